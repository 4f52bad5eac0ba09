use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tracing::{debug, info, trace, warn};

pub const RC_ENV_VAR: &str = "DAYBOOKRC";
pub const RC_FILE_NAME: &str = ".daybookrc";

/// `key = value` settings from the rc file, with command-line overrides
/// applied on top.
#[derive(Debug, Clone)]
pub struct Config {
    map: HashMap<String, String>,
    pub loaded_files: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let mut map = HashMap::new();
        map.insert("data.location".to_string(), "~/.daybook".to_string());
        map.insert("color".to_string(), "on".to_string());
        map.insert("dateformat".to_string(), "%Y-%m-%d".to_string());
        Self {
            map,
            loaded_files: vec![],
        }
    }
}

impl Config {
    #[tracing::instrument(skip(rc_override))]
    pub fn load(rc_override: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = Config::default();

        if let Some(path) = resolve_rc_path(rc_override)? {
            info!(rc = %path.display(), "loading daybookrc");
            cfg.load_file(&path)?;
        } else {
            debug!("no daybookrc found; using defaults");
        }

        Ok(cfg)
    }

    #[tracing::instrument(skip(self, overrides))]
    pub fn apply_overrides<I>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (k, v) in overrides {
            let key = k.strip_prefix("rc.").unwrap_or(&k).to_string();
            debug!(key = %key, value = %v, "applying override");
            self.map.insert(key, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.map.iter()
    }

    #[tracing::instrument(skip(self))]
    fn load_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let path = expand_tilde(path);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        self.loaded_files.push(path.clone());

        let base_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        for (line_num, raw_line) in text.lines().enumerate() {
            let mut line = raw_line.trim();
            if let Some((before, _)) = line.split_once('#') {
                line = before.trim();
            }
            if line.is_empty() {
                continue;
            }

            if let Some(include_rest) = line.strip_prefix("include ") {
                let include_path = resolve_include_path(&base_dir, include_rest.trim())?;
                debug!(
                    file = %path.display(),
                    include = %include_path.display(),
                    line = line_num + 1,
                    "processing include"
                );

                if self.loaded_files.contains(&include_path) {
                    warn!(include = %include_path.display(), "include cycle detected; skipping");
                } else if include_path.exists() {
                    self.load_file(&include_path)?;
                } else {
                    warn!(include = %include_path.display(), "include file does not exist; skipping");
                }
                continue;
            }

            let (k, v) = line.split_once('=').ok_or_else(|| {
                anyhow!(
                    "invalid config line {}:{}: {}",
                    path.display(),
                    line_num + 1,
                    raw_line
                )
            })?;

            let key = k.trim().to_string();
            let value = v.trim().to_string();
            trace!(key = %key, value = %value, "loaded config key");
            self.map.insert(key, value);
        }

        Ok(())
    }
}

#[tracing::instrument(skip(cfg, override_dir))]
pub fn resolve_data_dir(cfg: &Config, override_dir: Option<&Path>) -> anyhow::Result<PathBuf> {
    let dir = if let Some(path) = override_dir {
        path.to_path_buf()
    } else if let Some(cfg_value) = cfg.get("data.location") {
        expand_tilde(Path::new(&cfg_value))
    } else {
        default_data_dir()?
    };

    if !dir.exists() {
        info!(dir = %dir.display(), "creating data directory");
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    Ok(dir)
}

#[tracing::instrument(skip(override_path))]
fn resolve_rc_path(override_path: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = override_path {
        return Ok(Some(path.to_path_buf()));
    }

    if let Ok(rc_env) = std::env::var(RC_ENV_VAR) {
        if rc_env == "/dev/null" {
            return Ok(None);
        }
        return Ok(Some(PathBuf::from(rc_env)));
    }

    let Some(home) = dirs::home_dir() else {
        warn!("cannot determine home directory; skipping daybookrc lookup");
        return Ok(None);
    };
    let candidate = home.join(RC_FILE_NAME);
    if candidate.exists() {
        return Ok(Some(candidate));
    }

    Ok(None)
}

fn default_data_dir() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(home.join(".daybook"))
}

fn resolve_include_path(base_dir: &Path, include: &str) -> anyhow::Result<PathBuf> {
    if include.trim().is_empty() {
        return Err(anyhow!("include path cannot be empty"));
    }

    let raw = PathBuf::from(include);
    let expanded = expand_tilde(&raw);
    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Ok(base_dir.join(expanded))
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if let Some(rest) = text.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{Config, resolve_data_dir};

    #[test]
    fn defaults_are_present_without_a_file() {
        let cfg = Config::default();
        assert_eq!(cfg.get("color").as_deref(), Some("on"));
        assert_eq!(cfg.get("dateformat").as_deref(), Some("%Y-%m-%d"));
        assert!(cfg.loaded_files.is_empty());
    }

    #[test]
    fn loads_file_with_comments_and_includes() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("colors.rc"), "color = off\n").expect("write include");
        let rc = temp.path().join("daybookrc");
        fs::write(
            &rc,
            "# daybook settings\ntimezone = Europe/Berlin  # trailing comment\n\ninclude colors.rc\n",
        )
        .expect("write rc");

        let cfg = Config::load(Some(&rc)).expect("load config");
        assert_eq!(cfg.get("timezone").as_deref(), Some("Europe/Berlin"));
        assert_eq!(cfg.get("color").as_deref(), Some("off"));
        assert_eq!(cfg.loaded_files.len(), 2);
    }

    #[test]
    fn self_include_does_not_recurse() {
        let temp = tempdir().expect("tempdir");
        let rc = temp.path().join("loop.rc");
        fs::write(&rc, "include loop.rc\ncolor = off\n").expect("write rc");

        let cfg = Config::load(Some(&rc)).expect("load config");
        assert_eq!(cfg.get("color").as_deref(), Some("off"));
    }

    #[test]
    fn rejects_lines_without_equals() {
        let temp = tempdir().expect("tempdir");
        let rc = temp.path().join("bad.rc");
        fs::write(&rc, "color on\n").expect("write rc");
        assert!(Config::load(Some(&rc)).is_err());
    }

    #[test]
    fn overrides_strip_rc_prefix() {
        let mut cfg = Config::default();
        cfg.apply_overrides([
            ("rc.color".to_string(), "off".to_string()),
            ("dateformat".to_string(), "%d/%m/%Y".to_string()),
        ]);
        assert_eq!(cfg.get("color").as_deref(), Some("off"));
        assert_eq!(cfg.get("dateformat").as_deref(), Some("%d/%m/%Y"));
    }

    #[test]
    fn data_dir_override_wins_and_is_created() {
        let temp = tempdir().expect("tempdir");
        let wanted = temp.path().join("data");
        let dir = resolve_data_dir(&Config::default(), Some(&wanted)).expect("resolve");
        assert_eq!(dir, wanted);
        assert!(wanted.is_dir());
    }
}
