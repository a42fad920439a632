//! ZFS backend adapter
//!
//! [`ZfsBackend`] is the narrow command interface the reconciler drives.
//! [`ZfsCli`] implements it by invoking the `zfs(8)` binary.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::metrics;

#[cfg(test)]
use mockall::automock;

/// Columns requested from `zfs list`, in output order
const LIST_COLUMNS: [&str; 4] = ["name", "volsize", "used", "referenced"];

/// stderr fragment reported by `zfs create` for an existing dataset
const ALREADY_EXISTS: &str = "dataset already exists";

/// Ends option parsing so a dataset name starting with `-` stays an operand
const END_OF_OPTIONS: &str = "--";

/// A zvol as reported by the backend
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dataset {
    /// Full dataset name, e.g. `tank/k8s/pvc-1`
    pub name: String,
    /// Properties reported alongside the name
    pub properties: BTreeMap<String, String>,
}

impl Dataset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Volume size in bytes, if reported
    pub fn volsize(&self) -> Option<u64> {
        self.properties.get("volsize")?.parse().ok()
    }
}

/// Flags for `zfs destroy`; the default destroys only the named dataset
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DestroyFlags {
    /// `-r`: destroy all children
    pub recursive: bool,
    /// `-R`: destroy all dependents, including clones
    pub recursive_clones: bool,
    /// `-f`: force unmount
    pub force_unmount: bool,
    /// `-d`: defer snapshot deletion
    pub defer: bool,
}

impl DestroyFlags {
    fn args(&self) -> Vec<&'static str> {
        let mut args = Vec::new();
        if self.recursive {
            args.push("-r");
        }
        if self.recursive_clones {
            args.push("-R");
        }
        if self.force_unmount {
            args.push("-f");
        }
        if self.defer {
            args.push("-d");
        }
        args
    }
}

/// Commands the reconciler issues against the storage backend
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ZfsBackend: Send + Sync {
    /// List the zvols directly under `parent`. Fails if `parent` does not exist.
    async fn list_children(&self, parent: &str) -> Result<Vec<Dataset>>;

    /// Create a zvol of `size_bytes` with the given properties
    async fn create_volume(
        &self,
        name: &str,
        size_bytes: u64,
        properties: &BTreeMap<String, String>,
    ) -> Result<Dataset>;

    /// Set a single property on an existing dataset
    async fn set_property(&self, dataset: &Dataset, key: &str, value: &str) -> Result<()>;

    /// Destroy a dataset
    async fn destroy(&self, dataset: &Dataset, flags: DestroyFlags) -> Result<()>;
}

/// [`ZfsBackend`] backed by the `zfs` command line tool
#[derive(Clone, Debug)]
pub struct ZfsCli {
    binary: PathBuf,
}

impl ZfsCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run `zfs <args>` and return stdout.
    ///
    /// The child is killed if the returned future is dropped.
    async fn run(&self, args: &[String]) -> Result<String> {
        let operation = args.first().map(String::as_str).unwrap_or("unknown");
        let command = format!("{} {}", self.binary.display(), args.join(" "));
        debug!(command = %command, "Running zfs command");

        let _timer = metrics::ZFS_OPERATION_DURATION
            .with_label_values(&[operation])
            .start_timer();
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                metrics::ZFS_OPERATIONS
                    .with_label_values(&[operation, "error"])
                    .inc();
                return Err(e.into());
            }
        };

        if !output.status.success() {
            metrics::ZFS_OPERATIONS
                .with_label_values(&[operation, "failure"])
                .inc();
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::zfs(command, stderr.trim()));
        }

        metrics::ZFS_OPERATIONS
            .with_label_values(&[operation, "success"])
            .inc();
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Look up a single zvol by its full name
    async fn get(&self, name: &str) -> Result<Dataset> {
        let mut args = list_args();
        args.push(END_OF_OPTIONS.to_string());
        args.push(name.to_string());
        let stdout = self.run(&args).await?;

        parse_list_output(&stdout)
            .into_iter()
            .find(|ds| ds.name == name)
            .ok_or_else(|| Error::zfs(format!("zfs list {}", name), "dataset not reported"))
    }
}

#[async_trait]
impl ZfsBackend for ZfsCli {
    async fn list_children(&self, parent: &str) -> Result<Vec<Dataset>> {
        let stdout = self.run(&children_args(parent)).await?;

        Ok(parse_list_output(&stdout)
            .into_iter()
            .filter(|ds| ds.name != parent)
            .collect())
    }

    async fn create_volume(
        &self,
        name: &str,
        size_bytes: u64,
        properties: &BTreeMap<String, String>,
    ) -> Result<Dataset> {
        let args = create_args(name, size_bytes, properties);

        match self.run(&args).await {
            Ok(_) => {
                info!(name = %name, size_bytes, "Created zvol");
            }
            Err(Error::Zfs { stderr, .. }) if stderr.contains(ALREADY_EXISTS) => {
                debug!(name = %name, "zvol already exists");
            }
            Err(e) => return Err(e),
        }

        self.get(name).await
    }

    async fn set_property(&self, dataset: &Dataset, key: &str, value: &str) -> Result<()> {
        self.run(&set_args(&dataset.name, key, value)).await?;
        Ok(())
    }

    async fn destroy(&self, dataset: &Dataset, flags: DestroyFlags) -> Result<()> {
        self.run(&destroy_args(&dataset.name, flags)).await?;
        Ok(())
    }
}

fn list_args() -> Vec<String> {
    ["list", "-H", "-p", "-t", "volume", "-o"]
        .into_iter()
        .map(String::from)
        .chain(std::iter::once(LIST_COLUMNS.join(",")))
        .collect()
}

fn children_args(parent: &str) -> Vec<String> {
    let mut args = list_args();
    args.extend(["-r", "-d", "1", END_OF_OPTIONS].map(String::from));
    args.push(parent.to_string());
    args
}

fn set_args(name: &str, key: &str, value: &str) -> Vec<String> {
    vec![
        "set".to_string(),
        END_OF_OPTIONS.to_string(),
        format!("{}={}", key, value),
        name.to_string(),
    ]
}

fn destroy_args(name: &str, flags: DestroyFlags) -> Vec<String> {
    let mut args = vec!["destroy".to_string()];
    args.extend(flags.args().into_iter().map(String::from));
    args.push(END_OF_OPTIONS.to_string());
    args.push(name.to_string());
    args
}

fn create_args(name: &str, size_bytes: u64, properties: &BTreeMap<String, String>) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "-p".to_string(),
        "-V".to_string(),
        size_bytes.to_string(),
    ];
    for (key, value) in properties {
        args.push("-o".to_string());
        args.push(format!("{}={}", key, value));
    }
    args.push(END_OF_OPTIONS.to_string());
    args.push(name.to_string());
    args
}

/// Parse `zfs list -H -p` output, one tab-separated dataset per line
fn parse_list_output(stdout: &str) -> Vec<Dataset> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let name = fields.next()?.trim();
            if name.is_empty() {
                return None;
            }

            let properties = LIST_COLUMNS[1..]
                .iter()
                .zip(fields)
                .filter(|(_, value)| *value != "-")
                .map(|(column, value)| (column.to_string(), value.trim().to_string()))
                .collect();

            Some(Dataset {
                name: name.to_string(),
                properties,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tab_separated_listing() {
        let stdout = "tank/pvc1\t1073741824\t1105920\t57344\n\
                      tank/pvc10\t2147483648\t-\t57344\n\n";

        let datasets = parse_list_output(stdout);

        assert_eq!(datasets.len(), 2);
        assert_eq!(datasets[0].name, "tank/pvc1");
        assert_eq!(datasets[0].volsize(), Some(1_073_741_824));
        assert_eq!(datasets[0].properties["used"], "1105920");
        assert!(!datasets[1].properties.contains_key("used"));
    }

    #[test]
    fn create_args_place_properties_before_name() {
        let properties = BTreeMap::from([
            ("compression".to_string(), "lz4".to_string()),
            ("volblocksize".to_string(), "16k".to_string()),
        ]);

        let args = create_args("tank/pvc1", 1024, &properties);

        assert_eq!(
            args,
            vec![
                "create",
                "-p",
                "-V",
                "1024",
                "-o",
                "compression=lz4",
                "-o",
                "volblocksize=16k",
                "--",
                "tank/pvc1"
            ]
        );
    }

    #[test]
    fn default_destroy_has_no_flags() {
        assert!(DestroyFlags::default().args().is_empty());

        let all = DestroyFlags {
            recursive: true,
            recursive_clones: true,
            force_unmount: true,
            defer: true,
        };
        assert_eq!(all.args(), vec!["-r", "-R", "-f", "-d"]);
    }

    #[test]
    fn list_requests_machine_readable_volumes() {
        let args = list_args();
        assert_eq!(
            args,
            vec!["list", "-H", "-p", "-t", "volume", "-o", "name,volsize,used,referenced"]
        );
    }

    #[test]
    fn dataset_operands_follow_end_of_options() {
        assert_eq!(
            children_args("-r/x")[7..],
            ["-r", "-d", "1", "--", "-r/x"].map(String::from)
        );
        assert_eq!(
            set_args("-r/x", "compression", "lz4"),
            vec!["set", "--", "compression=lz4", "-r/x"]
        );
        assert_eq!(
            destroy_args("-r/x", DestroyFlags::default()),
            vec!["destroy", "--", "-r/x"]
        );

        let create = create_args("-r/x", 1024, &BTreeMap::new());
        assert_eq!(create[create.len() - 2..], ["--", "-r/x"].map(String::from));
    }

    #[tokio::test]
    async fn missing_binary_is_an_io_error() {
        let cli = ZfsCli::new("/nonexistent/zfs-binary");
        let err = cli.list_children("tank").await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
