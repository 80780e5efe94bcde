use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Error};
use log::debug;

/// A representation of a fstab file. Comments and blank lines are kept so
/// that rewriting a file only touches the entries that changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TabFile {
    lines: Vec<TabLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TabLine {
    Entry(TabFileEntry),
    Verbatim(String),
}

/// A representation of a single entry in a tab file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabFileEntry {
    /// Device reference, e.g. `/dev/sda1` or `UUID=...`.
    pub spec: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
    pub options: Vec<String>,
    pub dump: u32,
    pub passno: u32,
}

impl TabFileEntry {
    pub fn new(
        spec: impl Into<String>,
        mount_point: impl Into<PathBuf>,
        fs_type: impl Into<String>,
    ) -> Self {
        Self {
            spec: spec.into(),
            mount_point: mount_point.into(),
            fs_type: fs_type.into(),
            options: Vec::new(),
            dump: 0,
            passno: 0,
        }
    }

    /// Add options to this entry.
    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    pub fn with_passno(mut self, passno: u32) -> Self {
        self.passno = passno;
        self
    }

    fn matches(&self, spec: &str, mount_point: &Path) -> bool {
        self.spec == spec && self.mount_point == mount_point
    }

    /// Parses one non-comment line.
    pub fn parse(line: &str) -> Result<Self, Error> {
        let fields = line.split_whitespace().collect::<Vec<_>>();
        if fields.len() < 4 || fields.len() > 6 {
            bail!("Expected 4 to 6 fields, found {}: '{line}'", fields.len());
        }

        let number = |index: usize, name: &str| -> Result<u32, Error> {
            fields
                .get(index)
                .map(|value| {
                    value
                        .parse::<u32>()
                        .with_context(|| format!("Invalid {name} field '{value}'"))
                })
                .unwrap_or(Ok(0))
        };

        Ok(Self {
            spec: unescape(fields[0]),
            mount_point: PathBuf::from(unescape(fields[1])),
            fs_type: fields[2].to_string(),
            options: match fields[3] {
                "defaults" => Vec::new(),
                options => options.split(',').map(str::to_string).collect(),
            },
            dump: number(4, "dump")?,
            passno: number(5, "passno")?,
        })
    }

    /// Render this entry as a string suitable for writing to a tab file.
    pub fn render(&self) -> String {
        // If the options are empty, use "defaults" as the default
        let options = if self.options.is_empty() {
            "defaults".into()
        } else {
            self.options.join(",")
        };

        format!(
            "{}  {}  {}  {}  {} {}\n",
            escape(&self.spec),
            escape(&self.mount_point.to_string_lossy()),
            self.fs_type,
            options,
            self.dump,
            self.passno,
        )
    }
}

impl Display for TabFileEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} on {}", self.spec, self.mount_point.display())
    }
}

/// Whitespace in fstab fields is written as octal escapes.
fn escape(field: &str) -> String {
    field
        .replace('\\', "\\134")
        .replace(' ', "\\040")
        .replace('\t', "\\011")
}

fn unescape(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\134", "\\")
}

impl TabFile {
    /// Parses the contents of a tab file.
    pub fn parse(contents: &str) -> Result<Self, Error> {
        let lines = contents
            .lines()
            .enumerate()
            .map(|(number, line)| {
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    Ok(TabLine::Verbatim(line.to_string()))
                } else {
                    TabFileEntry::parse(trimmed)
                        .map(TabLine::Entry)
                        .with_context(|| format!("Failed to parse line {}", number + 1))
                }
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Self { lines })
    }

    /// Reads a tab file. A missing file reads as an empty one.
    pub fn read(tab_file_path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = tab_file_path.as_ref();
        if !path.exists() {
            debug!("Tab file '{}' does not exist, starting empty", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Write this tab file to disk at location `tab_file_path`.
    pub fn write(&self, tab_file_path: impl AsRef<Path>) -> Result<(), Error> {
        std::fs::write(tab_file_path.as_ref(), self.render().as_bytes())
            .with_context(|| format!("Failed to write new {}", tab_file_path.as_ref().display()))
    }

    /// Render this tab file as a string.
    pub fn render(&self) -> String {
        self.lines
            .iter()
            .map(|line| match line {
                TabLine::Entry(entry) => entry.render(),
                TabLine::Verbatim(text) => format!("{text}\n"),
            })
            .collect()
    }

    /// Returns the entries, skipping comments.
    pub fn entries(&self) -> impl Iterator<Item = &TabFileEntry> {
        self.lines.iter().filter_map(|line| match line {
            TabLine::Entry(entry) => Some(entry),
            TabLine::Verbatim(_) => None,
        })
    }

    pub fn find(&self, spec: &str, mount_point: &Path) -> Option<&TabFileEntry> {
        self.entries()
            .find(|entry| entry.matches(spec, mount_point))
    }

    fn position(&self, spec: &str, mount_point: &Path) -> Option<usize> {
        self.lines.iter().position(|line| match line {
            TabLine::Entry(entry) => entry.matches(spec, mount_point),
            TabLine::Verbatim(_) => false,
        })
    }
}

/// Persisted mount table, keyed by device spec and mount path.
pub trait MountTable {
    /// Adds an entry. Entries for mount points nested below the new one stay
    /// after it.
    fn add_entry(&mut self, entry: TabFileEntry) -> Result<(), Error>;

    /// Replaces the entry for `spec` on `mount_point`.
    fn update_entry(
        &mut self,
        spec: &str,
        mount_point: &Path,
        new: TabFileEntry,
    ) -> Result<(), Error>;

    /// Removes the entry for `spec` on `mount_point`.
    fn remove_entry(&mut self, spec: &str, mount_point: &Path) -> Result<(), Error>;
}

impl MountTable for TabFile {
    fn add_entry(&mut self, entry: TabFileEntry) -> Result<(), Error> {
        if self.find(&entry.spec, &entry.mount_point).is_some() {
            bail!("Entry for {entry} already exists");
        }

        // Keep parents before their nested mount points.
        let nested = self.lines.iter().position(|line| match line {
            TabLine::Entry(existing) => {
                existing.mount_point != entry.mount_point
                    && entry.mount_point.is_absolute()
                    && existing.mount_point.starts_with(&entry.mount_point)
            }
            TabLine::Verbatim(_) => false,
        });

        match nested {
            Some(index) => self.lines.insert(index, TabLine::Entry(entry)),
            None => self.lines.push(TabLine::Entry(entry)),
        }
        Ok(())
    }

    fn update_entry(
        &mut self,
        spec: &str,
        mount_point: &Path,
        new: TabFileEntry,
    ) -> Result<(), Error> {
        let Some(index) = self.position(spec, mount_point) else {
            bail!(
                "No entry for {spec} on {} to update",
                mount_point.display()
            );
        };
        self.lines[index] = TabLine::Entry(new);
        Ok(())
    }

    fn remove_entry(&mut self, spec: &str, mount_point: &Path) -> Result<(), Error> {
        let Some(index) = self.position(spec, mount_point) else {
            bail!(
                "No entry for {spec} on {} to remove",
                mount_point.display()
            );
        };
        self.lines.remove(index);
        Ok(())
    }
}

/// Mount table backed by a file; every change is written through.
#[derive(Debug, Clone)]
pub struct TabFileStore {
    path: PathBuf,
}

impl TabFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn modify(&self, change: impl FnOnce(&mut TabFile) -> Result<(), Error>) -> Result<(), Error> {
        let mut tab_file = TabFile::read(&self.path)?;
        change(&mut tab_file)?;
        tab_file.write(&self.path)
    }
}

impl MountTable for TabFileStore {
    fn add_entry(&mut self, entry: TabFileEntry) -> Result<(), Error> {
        self.modify(|tab_file| tab_file.add_entry(entry))
    }

    fn update_entry(
        &mut self,
        spec: &str,
        mount_point: &Path,
        new: TabFileEntry,
    ) -> Result<(), Error> {
        self.modify(|tab_file| tab_file.update_entry(spec, mount_point, new))
    }

    fn remove_entry(&mut self, spec: &str, mount_point: &Path) -> Result<(), Error> {
        self.modify(|tab_file| tab_file.remove_entry(spec, mount_point))
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    const SAMPLE: &str = indoc! {r#"
        # /etc/fstab: static file system information.

        UUID=1111  /  ext4  defaults  0 1
        /dev/sda2  /home  xfs  noatime,nodev  0 2
        /dev/sda3  swap  swap  defaults  0 0
    "#};

    #[test]
    fn test_parse_and_render() {
        let tab_file = TabFile::parse(SAMPLE).unwrap();
        assert_eq!(tab_file.entries().count(), 3);

        let home = tab_file.find("/dev/sda2", Path::new("/home")).unwrap();
        assert_eq!(home.fs_type, "xfs");
        assert_eq!(home.options, vec!["noatime", "nodev"]);
        assert_eq!(home.passno, 2);

        // Comments, blank lines and entries survive a round trip.
        assert_eq!(tab_file.render(), SAMPLE);
    }

    #[test]
    fn test_parse_errors() {
        assert!(TabFile::parse("/dev/sda1 /\n").is_err());
        assert!(TabFile::parse("/dev/sda1 / ext4 defaults x 1\n").is_err());
    }

    #[test]
    fn test_escapes() {
        let entry = TabFileEntry::new("/dev/sdb1", "/mnt/my data", "vfat");
        let rendered = entry.render();
        assert_eq!(rendered, "/dev/sdb1  /mnt/my\\040data  vfat  defaults  0 0\n");
        assert_eq!(TabFileEntry::parse(rendered.trim()).unwrap(), entry);
    }

    #[test]
    fn test_mount_table() {
        let mut tab_file = TabFile::parse(SAMPLE).unwrap();

        // Parents go before nested mount points.
        tab_file
            .add_entry(TabFileEntry::new("/dev/sdb1", "/srv", "ext4").with_passno(2))
            .unwrap();
        tab_file
            .add_entry(TabFileEntry::new("/dev/sdb2", "/srv/data", "ext4"))
            .unwrap();
        tab_file
            .add_entry(TabFileEntry::new("/dev/sdb3", "/srv/www", "ext4"))
            .unwrap();
        let mount_points = tab_file
            .entries()
            .map(|entry| entry.mount_point.to_string_lossy().to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            mount_points,
            vec!["/", "/home", "swap", "/srv", "/srv/data", "/srv/www"]
        );

        assert!(tab_file
            .add_entry(TabFileEntry::new("/dev/sdb1", "/srv", "ext4"))
            .is_err());

        tab_file
            .update_entry(
                "/dev/sda2",
                Path::new("/home"),
                TabFileEntry::new("UUID=2222", "/home", "xfs"),
            )
            .unwrap();
        assert!(tab_file.find("/dev/sda2", Path::new("/home")).is_none());
        assert!(tab_file.find("UUID=2222", Path::new("/home")).is_some());

        tab_file
            .remove_entry("/dev/sda3", Path::new("swap"))
            .unwrap();
        assert!(tab_file
            .remove_entry("/dev/sda3", Path::new("swap"))
            .is_err());
        assert_eq!(tab_file.entries().count(), 5);
    }

    #[test]
    fn test_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fstab");
        let mut store = TabFileStore::new(&path);

        // The file is created on first use.
        store
            .add_entry(TabFileEntry::new("UUID=1111", "/", "ext4").with_passno(1))
            .unwrap();
        store
            .add_entry(TabFileEntry::new("UUID=2222", "/home", "xfs"))
            .unwrap();
        store.remove_entry("UUID=2222", Path::new("/home")).unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "UUID=1111  /  ext4  defaults  0 1\n"
        );
    }
}
