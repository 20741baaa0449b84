use std::env;
use std::path::Path;
use std::process::Command;

/// Options derived from the host machine used to configure cargo commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    pub features: Vec<String>,
    /// Device passed to `stockham-sweep` by the `sweep` task.
    pub device: String,
}

impl BuildConfig {
    /// Join features into a single string suitable for passing to cargo.
    pub fn features_arg(&self) -> Option<String> {
        if self.features.is_empty() {
            None
        } else {
            Some(self.features.join(" "))
        }
    }
}

/// Locations where an installed OpenCL driver leaves a trace.
const ICD_PATHS: &[&str] = &[
    "/etc/OpenCL/vendors",
    "/System/Library/Frameworks/OpenCL.framework",
];

/// Detect build configuration from the current machine.
pub fn detect_config() -> BuildConfig {
    let has_icd = detect_opencl();
    let extra = env::var("STOCKHAM_CL_FEATURES").unwrap_or_default();
    compute_config(has_icd, &extra)
}

fn detect_opencl() -> bool {
    if let Ok(v) = env::var("OCL_ICD_VENDORS") {
        if !v.trim().is_empty() {
            return true;
        }
    }
    ICD_PATHS.iter().any(|p| icd_present(Path::new(p)))
}

fn icd_present(path: &Path) -> bool {
    if path.extension().is_some_and(|e| e == "framework") {
        return path.exists();
    }
    std::fs::read_dir(path)
        .map(|mut entries| {
            entries.any(|e| {
                e.map(|e| e.path().extension().is_some_and(|x| x == "icd"))
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

/// Compute a [`BuildConfig`] from supplied inputs. This is separated for testing.
pub fn compute_config(has_icd: bool, extra: &str) -> BuildConfig {
    let mut features = Vec::new();
    if has_icd {
        features.push("opencl".to_string());
    }
    for feat in extra.split_whitespace() {
        if !features.iter().any(|f| f == feat) {
            features.push(feat.to_string());
        }
    }
    let device = if features.iter().any(|f| f == "opencl") {
        "opencl"
    } else {
        "host"
    };
    BuildConfig {
        features,
        device: device.to_string(),
    }
}

pub fn build_command(cfg: &BuildConfig) -> Command {
    let mut cmd = Command::new("cargo");
    cmd.arg("build");
    if let Some(f) = cfg.features_arg() {
        cmd.arg("--features").arg(f);
    }
    cmd
}

pub fn test_command(cfg: &BuildConfig) -> Command {
    let mut cmd = Command::new("cargo");
    cmd.arg("test");
    if let Some(f) = cfg.features_arg() {
        cmd.arg("--features").arg(f);
    }
    cmd
}

pub fn clippy_command() -> Command {
    let mut cmd = Command::new("cargo");
    cmd.args(["clippy", "--all-targets", "--all-features"]);
    cmd
}

pub fn fmt_command() -> Command {
    let mut cmd = Command::new("cargo");
    cmd.args(["fmt", "--all"]);
    cmd
}

/// Release run of the sweep binary; `args` are forwarded to it.
pub fn sweep_command(cfg: &BuildConfig, args: &[String]) -> Command {
    let mut cmd = Command::new("cargo");
    cmd.args(["run", "--release", "--bin", "stockham-sweep"]);
    if let Some(f) = cfg.features_arg() {
        cmd.arg("--features").arg(f);
    }
    cmd.args(["--", "--device", &cfg.device]);
    cmd.args(args);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_icd_enables_opencl() {
        let cfg = compute_config(true, "");
        assert_eq!(cfg.features, vec!["opencl".to_string()]);
        assert_eq!(cfg.device, "opencl");
        assert_eq!(cfg.features_arg().as_deref(), Some("opencl"));
    }

    #[test]
    fn test_no_icd_uses_host() {
        let cfg = compute_config(false, "");
        assert!(cfg.features.is_empty());
        assert_eq!(cfg.device, "host");
        assert!(cfg.features_arg().is_none());
    }

    #[test]
    fn test_extra_features() {
        let cfg = compute_config(true, "opencl  feat1");
        assert_eq!(cfg.features, vec!["opencl".to_string(), "feat1".to_string()]);
        let cfg = compute_config(false, "opencl");
        assert_eq!(cfg.device, "opencl");
    }

    #[test]
    fn test_commands_include_features() {
        let cfg = compute_config(true, "");
        let a = args(&build_command(&cfg));
        assert!(a.contains(&"build".to_string()));
        assert!(a.contains(&"--features".to_string()));
        assert!(a.contains(&"opencl".to_string()));
    }

    #[test]
    fn test_sweep_forwards_arguments() {
        let cfg = compute_config(false, "");
        let a = args(&sweep_command(&cfg, &["--max-size".into(), "1024".into()]));
        let sep = a.iter().position(|x| x == "--").unwrap();
        assert_eq!(a[sep + 1..], ["--device", "host", "--max-size", "1024"]);
        assert!(!a.contains(&"--features".to_string()));
    }

    #[test]
    fn test_other_commands() {
        let cfg = compute_config(false, "");
        assert!(test_command(&cfg).get_args().any(|a| a == "test"));
        assert!(clippy_command().get_args().any(|a| a == "clippy"));
        assert!(fmt_command().get_args().any(|a| a == "fmt"));
    }

    #[test]
    fn test_icd_present_on_missing_dir() {
        let dir = env::temp_dir().join("xtask-no-such-icd-dir");
        assert!(!icd_present(&dir));
    }
}
