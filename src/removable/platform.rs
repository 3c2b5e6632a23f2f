// plantvault/src/removable/platform.rs
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{Volume, VolumeEnumerator};

const PSEUDO_FILESYSTEMS: &[&str] = &[
    "tmpfs", "devtmpfs", "overlay", "squashfs", "proc", "sysfs", "cgroup", "cgroup2", "autofs", "ramfs",
    "devpts", "mqueue", "debugfs", "tracefs", "securityfs", "pstore", "bpf", "fusectl", "configfs",
    "hugetlbfs", "binfmt_misc", "nsfs", "efivarfs", "devfs",
];

#[derive(Debug, Clone, PartialEq)]
struct MountEntry {
    source: String,
    target: PathBuf,
    fstype: String,
}

/// Mounted volumes as reported by the OS, classified with the host's removable-media hints.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemVolumes;

impl VolumeEnumerator for SystemVolumes {
    fn volumes(&self) -> Vec<Volume> {
        mount_entries()
            .into_iter()
            .filter(|entry| !PSEUDO_FILESYSTEMS.contains(&entry.fstype.as_str()))
            .filter_map(|entry| {
                let (total_bytes, available_bytes) = capacity(&entry.target)?;
                let removable = classify(&entry.source, &entry.target);
                debug!(
                    device = %entry.source,
                    mount_point = %entry.target.display(),
                    fstype = %entry.fstype,
                    removable,
                    "volume enumerated"
                );
                Some(Volume {
                    mount_point: entry.target,
                    total_bytes,
                    available_bytes,
                    removable,
                })
            })
            .collect()
    }
}

#[cfg(target_os = "linux")]
fn mount_entries() -> Vec<MountEntry> {
    match std::fs::read_to_string("/proc/self/mounts") {
        Ok(table) => parse_mount_table(&table),
        Err(e) => {
            tracing::warn!(error = %e, "could not read mount table");
            Vec::new()
        }
    }
}

#[cfg(target_os = "macos")]
fn mount_entries() -> Vec<MountEntry> {
    let mut entries = vec![MountEntry {
        source: "/".to_string(),
        target: PathBuf::from("/"),
        fstype: "apfs".to_string(),
    }];
    if let Ok(dir) = std::fs::read_dir("/Volumes") {
        entries.extend(dir.filter_map(|e| e.ok()).map(|e| MountEntry {
            source: e.file_name().to_string_lossy().to_string(),
            target: e.path(),
            fstype: String::new(),
        }));
    }
    entries
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn mount_entries() -> Vec<MountEntry> {
    Vec::new()
}

/// Parses `/proc/self/mounts` lines: `source target fstype options dump pass`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_mount_table(table: &str) -> Vec<MountEntry> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let fstype = fields.next()?;
            Some(MountEntry {
                source: unescape_mount_field(source),
                target: PathBuf::from(unescape_mount_field(target)),
                fstype: fstype.to_string(),
            })
        })
        .collect()
}

/// The kernel writes space, tab, newline and backslash as `\040`-style octal escapes.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b)) {
            let code = bytes[i + 1..i + 4].iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            if let Ok(byte) = u8::try_from(code) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}

#[cfg(unix)]
#[allow(clippy::unnecessary_cast)]
fn capacity(mount_point: &Path) -> Option<(u64, u64)> {
    let stats = nix::sys::statvfs::statvfs(mount_point).ok()?;
    let fragment = stats.fragment_size() as u64;
    Some((stats.blocks() as u64 * fragment, stats.blocks_available() as u64 * fragment))
}

#[cfg(not(unix))]
fn capacity(_mount_point: &Path) -> Option<(u64, u64)> {
    None
}

#[cfg(target_os = "linux")]
fn classify(device: &str, mount_point: &Path) -> bool {
    if block_device(device).is_some_and(|dev| sysfs_removable(&dev)) {
        return true;
    }
    let mount = mount_point.to_string_lossy();
    mount.starts_with("/media/") || mount.starts_with("/run/media/")
}

#[cfg(target_os = "macos")]
fn classify(_device: &str, mount_point: &Path) -> bool {
    mount_point.starts_with("/Volumes") && mount_point != Path::new("/Volumes/Macintosh HD")
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn classify(_device: &str, _mount_point: &Path) -> bool {
    false
}

/// `/dev/sdb1` -> `sdb`, `/dev/mmcblk0p1` -> `mmcblk0`, `/dev/nvme0n1p2` -> `nvme0n1`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn block_device(source: &str) -> Option<String> {
    let device = source.strip_prefix("/dev/")?;
    if device.starts_with("nvme") || device.starts_with("mmcblk") {
        match device.rfind('p') {
            Some(idx) if idx > 0 && idx + 1 < device.len() && device[idx + 1..].chars().all(|c| c.is_ascii_digit()) => {
                Some(device[..idx].to_string())
            }
            _ => Some(device.to_string()),
        }
    } else {
        Some(device.trim_end_matches(|c: char| c.is_ascii_digit()).to_string())
    }
}

#[cfg(target_os = "linux")]
fn sysfs_removable(device: &str) -> bool {
    std::fs::read_to_string(format!("/sys/block/{}/removable", device))
        .ok()
        .and_then(|content| content.trim().parse::<u8>().ok())
        .is_some_and(|flag| flag == 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_suffixes_are_stripped() {
        assert_eq!(block_device("/dev/sdb1").as_deref(), Some("sdb"));
        assert_eq!(block_device("/dev/mmcblk0p1").as_deref(), Some("mmcblk0"));
        assert_eq!(block_device("/dev/nvme0n1p2").as_deref(), Some("nvme0n1"));
        assert_eq!(block_device("/dev/nvme0n1").as_deref(), Some("nvme0n1"));
        assert_eq!(block_device("tmpfs"), None);
    }

    #[test]
    fn mount_table_lines_are_parsed_and_unescaped() {
        let table = "/dev/sda2 / ext4 rw,relatime 0 0\n\
                     proc /proc proc rw 0 0\n\
                     /dev/sdb1 /media/ana/MY\\040USB vfat rw,nosuid 0 0\n";
        let entries = parse_mount_table(table);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].source, "/dev/sdb1");
        assert_eq!(entries[2].target, PathBuf::from("/media/ana/MY USB"));
        assert_eq!(entries[2].fstype, "vfat");
        assert_eq!(unescape_mount_field("a\\134b"), "a\\b");
        assert_eq!(unescape_mount_field("trailing\\04"), "trailing\\04");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn media_mounts_count_as_removable() {
        assert!(classify("/dev/sdz1", Path::new("/media/ana/KINGSTON")));
        assert!(classify("/dev/sdz1", Path::new("/run/media/ana/USB")));
        assert!(!classify("none", Path::new("/data")));
    }

    #[cfg(unix)]
    #[test]
    fn root_volume_has_capacity() {
        let (total, available) = capacity(Path::new("/")).unwrap();
        assert!(total > 0);
        assert!(available <= total);
    }
}
