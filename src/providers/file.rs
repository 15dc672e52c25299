//! File provider - files and directories with optional contents

use anyhow::{Context, Result, bail};
use lcm_engine::{PropertyBag, ResourceInstance, ResourceProvider, SetResult};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const TYPE_NAME: &str = "File";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ensure {
    Present,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    File,
    Directory,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
        }
    }
}

/// Desired state read from a resource's properties
#[derive(Debug)]
struct DesiredFile {
    path: PathBuf,
    ensure: Ensure,
    kind: Kind,
    contents: Option<String>,
    checksum: Option<String>,
    recurse: bool,
}

impl DesiredFile {
    fn from_instance(instance: &ResourceInstance) -> Result<Self> {
        let path = instance
            .string_property("path")
            .with_context(|| format!("{} is missing the 'path' property", instance.key))?;

        let ensure = match instance.string_property("ensure").unwrap_or("present") {
            "present" => Ensure::Present,
            "absent" => Ensure::Absent,
            other => bail!("invalid ensure '{other}' (expected present or absent)"),
        };

        let kind = match instance.string_property("type").unwrap_or("file") {
            "file" => Kind::File,
            "directory" => Kind::Directory,
            other => bail!("invalid type '{other}' (expected file or directory)"),
        };

        Ok(Self {
            path: crate::paths::expand(path),
            ensure,
            kind,
            contents: instance.string_property("contents").map(str::to_string),
            checksum: instance.string_property("checksum").map(str::to_string),
            recurse: instance.bool_property("recurse").unwrap_or(false),
        })
    }
}

/// Observed state of a path
#[derive(Debug, PartialEq, Eq)]
enum Observed {
    Missing,
    Directory,
    File { checksum: String },
}

fn observe(path: &Path) -> Result<Observed> {
    if !path.exists() {
        return Ok(Observed::Missing);
    }
    if path.is_dir() {
        return Ok(Observed::Directory);
    }
    let content = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(Observed::File {
        checksum: hash(&content),
    })
}

fn hash(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}

fn describe(path: &Path, observed: &Observed) -> PropertyBag {
    let mut properties = PropertyBag::new();
    properties.insert("path".into(), path.to_string_lossy().to_string().into());
    match observed {
        Observed::Missing => {
            properties.insert("ensure".into(), "absent".into());
        }
        Observed::Directory => {
            properties.insert("ensure".into(), "present".into());
            properties.insert("type".into(), Kind::Directory.as_str().into());
        }
        Observed::File { checksum } => {
            properties.insert("ensure".into(), "present".into());
            properties.insert("type".into(), Kind::File.as_str().into());
            properties.insert("checksum".into(), checksum.clone().into());
        }
    }
    properties
}

/// Manages files and directories
#[derive(Debug, Default)]
pub struct FileProvider;

impl FileProvider {
    fn in_desired_state(want: &DesiredFile, observed: &Observed) -> bool {
        match (want.ensure, observed) {
            (Ensure::Absent, Observed::Missing) => true,
            (Ensure::Absent, _) | (Ensure::Present, Observed::Missing) => false,
            (Ensure::Present, Observed::Directory) => want.kind == Kind::Directory,
            (Ensure::Present, Observed::File { checksum }) => {
                want.kind == Kind::File
                    && want
                        .contents
                        .as_ref()
                        .is_none_or(|c| hash(c.as_bytes()) == *checksum)
                    && want.checksum.as_ref().is_none_or(|c| c == checksum)
            }
        }
    }

    fn remove(path: &Path, observed: &Observed) -> Result<()> {
        match observed {
            Observed::Missing => Ok(()),
            Observed::Directory => fs::remove_dir_all(path)
                .with_context(|| format!("Failed to remove directory {}", path.display())),
            Observed::File { .. } => {
                fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))
            }
        }
    }

    fn write_file(want: &DesiredFile, observed: &Observed) -> Result<()> {
        if let Some(parent) = want.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create parent directory: {}", parent.display())
            })?;
        }

        match (&want.contents, observed) {
            (Some(contents), _) => fs::write(&want.path, contents)
                .with_context(|| format!("Failed to write {}", want.path.display())),
            (None, Observed::Missing) if want.checksum.is_none() => fs::write(&want.path, "")
                .with_context(|| format!("Failed to create {}", want.path.display())),
            (None, _) => bail!(
                "{} does not match the requested checksum and no contents were given",
                want.path.display()
            ),
        }
    }
}

impl ResourceProvider for FileProvider {
    fn get(&self, desired: &ResourceInstance) -> Result<ResourceInstance> {
        let want = DesiredFile::from_instance(desired)?;
        let observed = observe(&want.path)?;
        Ok(desired.with_properties(describe(&want.path, &observed)))
    }

    fn test(&self, desired: &ResourceInstance) -> Result<bool> {
        let want = DesiredFile::from_instance(desired)?;
        let observed = observe(&want.path)?;
        Ok(Self::in_desired_state(&want, &observed))
    }

    fn set(&self, desired: &ResourceInstance) -> Result<SetResult> {
        let want = DesiredFile::from_instance(desired)?;
        let observed = observe(&want.path)?;
        if Self::in_desired_state(&want, &observed) {
            return Ok(SetResult::NoChange);
        }

        match (want.ensure, want.kind) {
            (Ensure::Absent, _) => Self::remove(&want.path, &observed)?,
            (Ensure::Present, Kind::Directory) => {
                if matches!(observed, Observed::File { .. }) {
                    Self::remove(&want.path, &observed)?;
                }
                fs::create_dir_all(&want.path).with_context(|| {
                    format!("Failed to create directory {}", want.path.display())
                })?;
            }
            (Ensure::Present, Kind::File) => {
                if observed == Observed::Directory {
                    Self::remove(&want.path, &observed)?;
                }
                Self::write_file(&want, &observe(&want.path)?)?;
            }
        }

        log::debug!("Converged {}", want.path.display());
        Ok(SetResult::Applied)
    }

    fn inventory(&self, filter: &ResourceInstance) -> Result<Vec<ResourceInstance>> {
        let want = DesiredFile::from_instance(filter)?;
        if !want.path.exists() {
            return Ok(Vec::new());
        }
        walk(&want.path, want.recurse)
    }
}

/// One instance per entry under `root`; an unreadable entry fails the walk
fn walk(root: &Path, recurse: bool) -> Result<Vec<ResourceInstance>> {
    let max_depth = if recurse { usize::MAX } else { 1 };
    let mut items = Vec::new();
    for entry in WalkDir::new(root).max_depth(max_depth).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        let path = entry.path();
        let observed = if entry.file_type().is_dir() {
            Observed::Directory
        } else {
            observe(path)?
        };
        let name = path.to_string_lossy();
        items.push(ResourceInstance {
            properties: describe(path, &observed),
            ..ResourceInstance::new(TYPE_NAME, ResourceInstance::key_for(TYPE_NAME, &name))
        });
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file(path: &Path) -> ResourceInstance {
        ResourceInstance::new(TYPE_NAME, "[File]test").with_property("path", path.to_string_lossy().as_ref())
    }

    #[test]
    fn test_create_file_with_contents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("etc").join("motd");
        let desired = file(&path).with_property("contents", "hello\n");

        assert!(!FileProvider.test(&desired).unwrap());
        assert_eq!(FileProvider.set(&desired).unwrap(), SetResult::Applied);
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello\n");
        assert!(FileProvider.test(&desired).unwrap());
        assert_eq!(FileProvider.set(&desired).unwrap(), SetResult::NoChange);
    }

    #[test]
    fn test_rewrites_changed_contents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("motd");
        fs::write(&path, "old").unwrap();
        let desired = file(&path).with_property("contents", "new");

        assert!(!FileProvider.test(&desired).unwrap());
        FileProvider.set(&desired).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    }

    #[test]
    fn test_checksum() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data");
        fs::write(&path, "payload").unwrap();

        let matching = file(&path).with_property("checksum", hash(b"payload").as_str());
        assert!(FileProvider.test(&matching).unwrap());

        let other = file(&path).with_property("checksum", hash(b"other").as_str());
        assert!(!FileProvider.test(&other).unwrap());
        assert!(FileProvider.set(&other).is_err());
    }

    #[test]
    fn test_ensure_absent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("gone");
        fs::write(&path, "x").unwrap();
        let desired = file(&path).with_property("ensure", "absent");

        assert!(!FileProvider.test(&desired).unwrap());
        assert_eq!(FileProvider.set(&desired).unwrap(), SetResult::Applied);
        assert!(!path.exists());
        assert_eq!(FileProvider.set(&desired).unwrap(), SetResult::NoChange);
    }

    #[test]
    fn test_directory() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a").join("b");
        let desired = file(&path).with_property("type", "directory");

        FileProvider.set(&desired).unwrap();
        assert!(path.is_dir());
        assert!(FileProvider.test(&desired).unwrap());
    }

    #[test]
    fn test_get_reports_actual_state() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("motd");
        let desired = file(&path).with_property("contents", "hi");

        let before = FileProvider.get(&desired).unwrap();
        assert_eq!(before.string_property("ensure"), Some("absent"));
        assert_eq!(before.key, "[File]test");

        fs::write(&path, "hi").unwrap();
        let after = FileProvider.get(&desired).unwrap();
        assert_eq!(after.string_property("ensure"), Some("present"));
        assert_eq!(after.string_property("checksum"), Some(hash(b"hi").as_str()));
    }

    #[test]
    fn test_inventory_lists_entries() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "a").unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        fs::write(temp.path().join("sub").join("b.txt"), "b").unwrap();

        let shallow = FileProvider.inventory(&file(temp.path())).unwrap();
        // root, a.txt, sub
        assert_eq!(shallow.len(), 3);

        let deep = FileProvider
            .inventory(&file(temp.path()).with_property("recurse", true))
            .unwrap();
        assert_eq!(deep.len(), 4);
        assert!(deep.iter().all(|i| i.type_name == TYPE_NAME));
    }

    #[test]
    fn test_walk_errors_are_reported() {
        let temp = TempDir::new().unwrap();
        let gone = temp.path().join("gone");
        let err = walk(&gone, true).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to walk"));

        // a missing inventory root is just empty
        assert!(FileProvider.inventory(&file(&gone)).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_properties() {
        let temp = TempDir::new().unwrap();
        let bad = file(temp.path()).with_property("ensure", "maybe");
        assert!(FileProvider.test(&bad).is_err());
        assert!(FileProvider.get(&ResourceInstance::new(TYPE_NAME, "x")).is_err());
    }
}
