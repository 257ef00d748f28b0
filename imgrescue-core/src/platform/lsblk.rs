use super::{DeviceSource, describe};
use crate::MB;
use crate::device::Device;
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

const LSBLK_COLUMNS: &str = "NAME,PATH,SIZE,RM,TRAN,TYPE,VENDOR,MODEL";

/// `lsblk` has reported flags and sizes both as JSON scalars and as strings
/// across util-linux releases.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Number(u64),
    Text(String),
}

impl Scalar {
    fn as_flag(&self) -> bool {
        match self {
            Scalar::Bool(b) => *b,
            Scalar::Number(n) => *n != 0,
            Scalar::Text(s) => s.trim() == "1" || s.trim() == "true",
        }
    }

    fn as_u64(&self) -> u64 {
        match self {
            Scalar::Bool(_) => 0,
            Scalar::Number(n) => *n,
            Scalar::Text(s) => s.trim().parse().unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    path: Option<String>,
    size: Option<Scalar>,
    rm: Option<Scalar>,
    tran: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    vendor: Option<String>,
    model: Option<String>,
}

/// Turns `lsblk --json` output into the removable USB disks it lists.
pub(crate) fn parse_lsblk(json: &str) -> Result<Vec<Device>> {
    let output: LsblkOutput =
        serde_json::from_str(json).context("failed to parse lsblk output")?;

    let devices = output
        .blockdevices
        .into_iter()
        .filter(|d| d.kind.as_deref() == Some("disk"))
        .filter(|d| d.rm.as_ref().is_some_and(Scalar::as_flag))
        .filter(|d| d.tran.as_deref() == Some("usb"))
        .filter_map(|d| {
            let size = d.size.as_ref().map_or(0, Scalar::as_u64);
            if size == 0 {
                debug!("skipping {}: reports no media", d.name);
                return None;
            }
            let path = d
                .path
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/dev").join(&d.name));
            Some(Device {
                path,
                description: describe(
                    d.vendor.as_deref().unwrap_or(""),
                    d.model.as_deref().unwrap_or(""),
                ),
                name: d.name,
                size_mb: size / MB,
                removable: true,
            })
        })
        .collect();

    Ok(devices)
}

/// Removable-media backend built on `lsblk`.
pub struct LsblkSource {
    program: PathBuf,
}

impl LsblkSource {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("lsblk"),
        }
    }
}

impl Default for LsblkSource {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceSource for LsblkSource {
    fn list(&self) -> Result<Vec<Device>> {
        let output = Command::new(&self.program)
            .args(["--json", "--bytes", "--nodeps", "--output", LSBLK_COLUMNS])
            .output()
            .with_context(|| format!("failed to run {}", self.program.display()))?;

        if !output.status.success() {
            return Err(anyhow!(
                "lsblk failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        parse_lsblk(&String::from_utf8_lossy(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_removable_usb_disks_in_order() {
        let json = r#"{
           "blockdevices": [
              {"name":"nvme0n1", "path":"/dev/nvme0n1", "size":512110190592, "rm":false, "tran":"nvme", "type":"disk", "vendor":null, "model":"Samsung SSD"},
              {"name":"sdc", "path":"/dev/sdc", "size":8004304896, "rm":true, "tran":"usb", "type":"disk", "vendor":"Kingston", "model":"DataTraveler"},
              {"name":"sdb", "path":"/dev/sdb", "size":16008609792, "rm":true, "tran":"usb", "type":"disk", "vendor":"SanDisk ", "model":"Cruzer Blade"},
              {"name":"sdd", "path":"/dev/sdd", "size":0, "rm":true, "tran":"usb", "type":"disk", "vendor":"Generic", "model":"Card Reader"},
              {"name":"mmcblk0", "path":"/dev/mmcblk0", "size":31914983424, "rm":true, "tran":null, "type":"disk", "vendor":null, "model":null},
              {"name":"sr0", "path":"/dev/sr0", "size":1073741312, "rm":true, "tran":"usb", "type":"rom", "vendor":"ASUS", "model":"DVD"}
           ]
        }"#;

        let devices = parse_lsblk(json).unwrap();
        let names: Vec<_> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["sdc", "sdb"]);
        assert_eq!(devices[1].size_mb, 15267);
        assert_eq!(devices[1].description, "SanDisk Cruzer Blade");
        assert_eq!(devices[1].path, PathBuf::from("/dev/sdb"));
    }

    #[test]
    fn accepts_string_flags_from_older_lsblk() {
        let json = r#"{"blockdevices": [
            {"name":"sdb", "size":"16008609792", "rm":"1", "tran":"usb", "type":"disk", "vendor":"SanDisk", "model":"Ultra"}
        ]}"#;

        let devices = parse_lsblk(json).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].path, PathBuf::from("/dev/sdb"));
        assert_eq!(devices[0].description, "SanDisk Ultra");
    }

    #[test]
    fn rejects_malformed_output() {
        assert!(parse_lsblk("not json").is_err());
    }
}
