use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, RwLock};

use super::errors::DownloadError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToolType {
    /// yt-dlp compatible extractor
    Extractor,
    /// ffmpeg
    Transcoder,
    /// ffprobe
    Prober,
    /// tor
    Proxy,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::Extractor => "ytprobe",
            ToolType::Transcoder => "ffmpeg",
            ToolType::Prober => "ffprobe",
            ToolType::Proxy => "tor",
        }
    }

    /// Only the extractor is required; the rest degrade functionality when missing
    pub fn is_mandatory(&self) -> bool {
        matches!(self, ToolType::Extractor)
    }

    /// Relative paths inside `<bundle>/context/<platform>/`
    fn bundle_names(&self) -> &'static [&'static str] {
        if cfg!(windows) {
            match self {
                ToolType::Extractor => &["ytprobe.exe", "yt-dlp.exe"],
                ToolType::Transcoder => &["ffmpeg.exe"],
                ToolType::Prober => &["ffprobe.exe"],
                ToolType::Proxy => &["TorBrowser/tor/tor.exe"],
            }
        } else {
            match self {
                ToolType::Extractor => &["ytprobe.bin", "yt-dlp"],
                ToolType::Transcoder => &["ffmpeg.bin", "ffmpeg"],
                ToolType::Prober => &["ffprobe.bin", "ffprobe"],
                ToolType::Proxy => &["TorBrowser/tor/tor"],
            }
        }
    }

    /// Names looked up in common prefixes and PATH
    fn system_names(&self) -> &'static [&'static str] {
        match self {
            ToolType::Extractor => &["yt-dlp", "ytprobe"],
            ToolType::Transcoder => &["ffmpeg"],
            ToolType::Prober => &["ffprobe"],
            ToolType::Proxy => &["tor"],
        }
    }
}

/// Resolved binary locations. Immutable once published by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutableSet {
    pub extractor: PathBuf,
    pub transcoder: Option<PathBuf>,
    pub prober: Option<PathBuf>,
    pub proxy: Option<PathBuf>,
    /// Tor data directory shipped with the bundle
    pub proxy_data_dir: Option<PathBuf>,
    /// torrc inside the data directory
    pub proxy_config: Option<PathBuf>,
}

impl ExecutableSet {
    pub fn get(&self, tool: ToolType) -> Option<&Path> {
        match tool {
            ToolType::Extractor => Some(self.extractor.as_path()),
            ToolType::Transcoder => self.transcoder.as_deref(),
            ToolType::Prober => self.prober.as_deref(),
            ToolType::Proxy => self.proxy.as_deref(),
        }
    }
}

/// Locates external binaries once and memoizes the result.
///
/// Concurrent first calls may each run the lookup; the first one to publish wins
/// and every later call reads the cached set.
#[derive(Debug)]
pub struct ExecutableResolver {
    bundle_dir: Option<PathBuf>,
    search_system: bool,
    cache: RwLock<Option<Arc<ExecutableSet>>>,
}

impl ExecutableResolver {
    pub fn new(bundle_dir: Option<PathBuf>) -> Self {
        Self {
            bundle_dir,
            search_system: true,
            cache: RwLock::new(None),
        }
    }

    /// Only look inside the bundle directory
    pub fn bundle_only(bundle_dir: PathBuf) -> Self {
        Self {
            bundle_dir: Some(bundle_dir),
            search_system: false,
            cache: RwLock::new(None),
        }
    }

    /// Already-known set, e.g. for embedding or tests
    pub fn preset(set: ExecutableSet) -> Self {
        Self {
            bundle_dir: None,
            search_system: false,
            cache: RwLock::new(Some(Arc::new(set))),
        }
    }

    pub fn resolve(&self) -> Result<Arc<ExecutableSet>, DownloadError> {
        if let Some(set) = self.cached() {
            return Ok(set);
        }

        let found = Arc::new(self.lookup()?);

        let mut guard = self
            .cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(guard.get_or_insert(found).clone())
    }

    pub fn cached(&self) -> Option<Arc<ExecutableSet>> {
        self.cache
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn lookup(&self) -> Result<ExecutableSet, DownloadError> {
        let extractor = self.detect_tool(ToolType::Extractor).ok_or_else(|| {
            DownloadError::ToolNotFound(format!(
                "{} not found (bundle: {:?})",
                ToolType::Extractor.as_str(),
                self.bundle_dir
            ))
        })?;

        let transcoder = self.detect_tool(ToolType::Transcoder);
        let prober = self.detect_tool(ToolType::Prober);
        let proxy = self.detect_tool(ToolType::Proxy);

        for (tool, path) in [
            (ToolType::Transcoder, &transcoder),
            (ToolType::Prober, &prober),
            (ToolType::Proxy, &proxy),
        ] {
            if path.is_none() {
                log::warn!(
                    "[Resolver] Optional tool {} not found; related features disabled",
                    tool.as_str()
                );
            }
        }

        let proxy_data_dir = self
            .platform_dir()
            .map(|dir| dir.join("TorBrowser").join("data"))
            .filter(|dir| dir.is_dir());
        let proxy_config = proxy_data_dir
            .as_ref()
            .map(|dir| dir.join("torrc"))
            .filter(|file| file.is_file());

        log::info!("[Resolver] Extractor: {}", extractor.display());

        Ok(ExecutableSet {
            extractor,
            transcoder,
            prober,
            proxy,
            proxy_data_dir,
            proxy_config,
        })
    }

    fn platform_dir(&self) -> Option<PathBuf> {
        let platform = if cfg!(windows) { "windows" } else { "linux" };
        self.bundle_dir
            .as_ref()
            .map(|dir| dir.join("context").join(platform))
    }

    fn detect_tool(&self, tool: ToolType) -> Option<PathBuf> {
        // 1. Bundled layout, then a flat bundle directory
        if let Some(bundle) = &self.bundle_dir {
            let roots = [self.platform_dir(), Some(bundle.clone())];
            for root in roots.iter().flatten() {
                for name in tool.bundle_names() {
                    let candidate = root.join(name);
                    if candidate.is_file() {
                        return Some(candidate);
                    }
                }
            }
        }

        if !self.search_system {
            return None;
        }

        // 2. Common install prefixes
        for name in tool.system_names() {
            for prefix in ["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin"] {
                let candidate = Path::new(prefix).join(name);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }

        // 3. PATH
        let finder = if cfg!(windows) { "where" } else { "which" };
        for name in tool.system_names() {
            if let Ok(output) = Command::new(finder).arg(name).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout)
                        .lines()
                        .next()
                        .unwrap_or("")
                        .trim()
                        .to_string();
                    if !path.is_empty() {
                        return Some(PathBuf::from(path));
                    }
                }
            }
        }

        None
    }
}

impl Default for ExecutableResolver {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn platform_root(bundle: &Path) -> PathBuf {
        let platform = if cfg!(windows) { "windows" } else { "linux" };
        bundle.join("context").join(platform)
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_resolves_bundled_layout() {
        let dir = tempfile::tempdir().unwrap();
        let root = platform_root(dir.path());
        touch(&root.join(ToolType::Extractor.bundle_names()[0]));
        touch(&root.join(ToolType::Transcoder.bundle_names()[0]));
        touch(&root.join(ToolType::Proxy.bundle_names()[0]));
        touch(&root.join("TorBrowser/data/torrc"));

        let resolver = ExecutableResolver::bundle_only(dir.path().to_path_buf());
        let set = resolver.resolve().unwrap();

        assert!(set.extractor.starts_with(&root));
        assert!(set.transcoder.is_some());
        assert!(set.prober.is_none());
        assert!(set.proxy.is_some());
        assert_eq!(set.proxy_data_dir, Some(root.join("TorBrowser").join("data")));
        assert_eq!(set.proxy_config, Some(root.join("TorBrowser").join("data").join("torrc")));
    }

    #[test]
    fn test_missing_extractor_fails_and_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let root = platform_root(dir.path());
        touch(&root.join(ToolType::Transcoder.bundle_names()[0]));

        let resolver = ExecutableResolver::bundle_only(dir.path().to_path_buf());
        assert!(matches!(resolver.resolve(), Err(DownloadError::ToolNotFound(_))));
        assert!(resolver.cached().is_none());

        touch(&root.join(ToolType::Extractor.bundle_names()[0]));
        assert!(resolver.resolve().is_ok());
    }

    #[test]
    fn test_result_is_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = dir.path().join(ToolType::Extractor.bundle_names()[0]);
        touch(&extractor);

        let resolver = ExecutableResolver::bundle_only(dir.path().to_path_buf());
        let first = resolver.resolve().unwrap();

        // Removing the binary must not change the published set
        fs::remove_file(&extractor).unwrap();
        let second = resolver.resolve().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.extractor, extractor);
    }

    #[test]
    fn test_concurrent_first_calls_agree() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join(ToolType::Extractor.bundle_names()[0]));
        let resolver = Arc::new(ExecutableResolver::bundle_only(dir.path().to_path_buf()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = resolver.clone();
                std::thread::spawn(move || r.resolve().unwrap())
            })
            .collect();
        let sets: Vec<Arc<ExecutableSet>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let cached = resolver.cached().unwrap();
        assert!(sets.iter().all(|s| **s == *cached));
    }

    #[test]
    fn test_preset_is_returned_as_is() {
        let set = ExecutableSet {
            extractor: PathBuf::from("/bin/ytprobe"),
            transcoder: None,
            prober: None,
            proxy: None,
            proxy_data_dir: None,
            proxy_config: None,
        };
        let resolver = ExecutableResolver::preset(set.clone());
        assert_eq!(*resolver.resolve().unwrap(), set);
        assert_eq!(resolver.resolve().unwrap().get(ToolType::Transcoder), None);
    }
}
