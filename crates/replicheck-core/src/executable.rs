//! Locating the litestream binary.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{VerifyError, VerifyResult};

/// Upstream litestream release the integration is tested against.
pub const UPSTREAM_VERSION: &str = "v0.3.13";

/// Platforms with upstream binary releases, as `<arch>-<os>`.
pub const NATIVE_PLATFORMS: &[&str] = &[
    "aarch64-linux",
    "x86_64-linux",
    "aarch64-macos",
    "x86_64-macos",
];

const INSTALL_DIR_VAR: &str = "LITESTREAM_INSTALL_DIR";
const BINARY_NAME: &str = "litestream";

/// The host platform in the same `<arch>-<os>` form as [`NATIVE_PLATFORMS`].
pub fn platform() -> String {
    format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS)
}

/// Resolve the executable using the process environment.
pub fn resolve(config: &Config) -> VerifyResult<PathBuf> {
    let install_dir = std::env::var_os(INSTALL_DIR_VAR).map(PathBuf::from);
    let search_path = std::env::var_os("PATH");
    resolve_with(
        config,
        install_dir.as_deref(),
        &platform(),
        search_path.as_deref(),
    )
}

/// Resolve the executable from explicit inputs.
///
/// Precedence: `LITESTREAM_INSTALL_DIR`, then `Config::executable`, then
/// `litestream` found in `search_path` when the platform has upstream
/// releases.
pub fn resolve_with(
    config: &Config,
    install_dir: Option<&Path>,
    platform: &str,
    search_path: Option<&OsStr>,
) -> VerifyResult<PathBuf> {
    let candidate = if let Some(dir) = install_dir {
        if !dir.is_dir() {
            return Err(VerifyError::DirectoryNotFound {
                path: dir.to_path_buf(),
            });
        }
        tracing::info!(
            install_dir = %dir.display(),
            "using LITESTREAM_INSTALL_DIR to find litestream executable"
        );
        dir.join(BINARY_NAME)
    } else if let Some(executable) = &config.executable {
        executable.clone()
    } else {
        if !NATIVE_PLATFORMS.contains(&platform) {
            return Err(VerifyError::UnsupportedPlatform {
                platform: platform.to_string(),
            });
        }
        return find_in_path(BINARY_NAME, search_path).ok_or_else(|| {
            VerifyError::ExecutableNotFound {
                path: PathBuf::from(BINARY_NAME),
            }
        });
    };

    if !candidate.exists() {
        return Err(VerifyError::ExecutableNotFound { path: candidate });
    }
    Ok(candidate)
}

fn find_in_path(binary: &str, search_path: Option<&OsStr>) -> Option<PathBuf> {
    let search_path = search_path?;
    for segment in std::env::split_paths(search_path) {
        let candidate = segment.join(binary);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    None
}
