//! File list payloads.
//!
//! Two native encodings exist for a list of files: the Windows DROPFILES
//! structure (`CF_HDROP`) and `text/uri-list` lines. Before a list leaves the
//! process every path passes a read-permission check, and paths inside
//! untrusted cache directories are dropped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use tracing::{debug, trace};

use crate::charset::Charset;
use crate::error::{DataTransferError, Result};

/// Size of the DROPFILES header
pub const DROPFILES_HEADER_LEN: usize = 20;

/// Property keys naming untrusted cache directories
pub const CACHE_DIR_PROPERTY_KEYS: [&str; 4] = [
    "datatransfer.system.cachedir",
    "datatransfer.user.cachedir",
    "datatransfer.launcher.cachedir",
    "datatransfer.plugin.cachedir",
];

/// Characters escaped in the path of a `file://` URI
const PATH_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

// =============================================================================
// Native file list codec
// =============================================================================

/// Converts a list of paths to and from a platform file-list format
pub trait FileListCodec: Send + Sync {
    /// Encode canonical path strings
    fn encode(&self, paths: &[String]) -> Result<Vec<u8>>;

    /// Decode to path strings, `None` when the payload holds no list
    fn decode(&self, bytes: &[u8]) -> Result<Option<Vec<String>>>;
}

/// Windows DROPFILES codec with wide (UTF-16LE) paths
#[derive(Debug, Clone, Copy, Default)]
pub struct DropFilesCodec;

impl FileListCodec for DropFilesCodec {
    fn encode(&self, paths: &[String]) -> Result<Vec<u8>> {
        // DROPFILES structure (20 bytes):
        // DWORD pFiles (offset to file list)
        // POINT pt (unused, 8 bytes)
        // BOOL fNC (unused, 4 bytes)
        // BOOL fWide (TRUE for Unicode)
        let mut result = Vec::with_capacity(DROPFILES_HEADER_LEN + paths.len() * 64);
        result.extend_from_slice(&(DROPFILES_HEADER_LEN as u32).to_le_bytes());
        result.extend_from_slice(&0i32.to_le_bytes());
        result.extend_from_slice(&0i32.to_le_bytes());
        result.extend_from_slice(&0u32.to_le_bytes());
        result.extend_from_slice(&1u32.to_le_bytes());

        for path in paths {
            for unit in path.encode_utf16() {
                result.extend_from_slice(&unit.to_le_bytes());
            }
            result.extend_from_slice(&[0, 0]);
        }

        // Final double null terminator
        result.extend_from_slice(&[0, 0]);

        Ok(result)
    }

    fn decode(&self, data: &[u8]) -> Result<Option<Vec<String>>> {
        if data.len() < DROPFILES_HEADER_LEN {
            return Err(DataTransferError::InvalidData("DROPFILES too small".to_string()));
        }

        let p_files = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let f_wide = u32::from_le_bytes([data[16], data[17], data[18], data[19]]) != 0;

        if p_files < DROPFILES_HEADER_LEN || p_files > data.len() {
            return Err(DataTransferError::InvalidData("invalid pFiles offset".to_string()));
        }

        let file_data = &data[p_files..];
        let mut paths = Vec::new();

        if f_wide {
            let mut pos = 0;
            while pos + 2 <= file_data.len() {
                let mut units = Vec::new();
                while pos + 2 <= file_data.len() {
                    let unit = u16::from_le_bytes([file_data[pos], file_data[pos + 1]]);
                    pos += 2;
                    if unit == 0 {
                        break;
                    }
                    units.push(unit);
                }

                if units.is_empty() {
                    break;
                }
                paths.push(String::from_utf16_lossy(&units));
            }
        } else {
            // ANSI paths (rare)
            let mut pos = 0;
            while pos < file_data.len() {
                let end = file_data[pos..]
                    .iter()
                    .position(|&b| b == 0)
                    .unwrap_or(file_data.len() - pos);
                if end == 0 {
                    break;
                }
                paths.push(Charset::Windows1252.decode(&file_data[pos..pos + end]));
                pos += end + 1;
            }
        }

        Ok(Some(paths))
    }
}

// =============================================================================
// URI lists
// =============================================================================

/// `file://` URI for an absolute path
pub fn path_to_file_uri(path: &str) -> String {
    let path = path.replace('\\', "/");
    let path = if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    };
    format!("file://{}", utf8_percent_encode(&path, PATH_ESCAPE))
}

/// Local path named by a `file:` URI, `None` for other schemes
pub fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    let rest = uri.strip_prefix("file:")?;
    let path = if let Some(authority_and_path) = rest.strip_prefix("//") {
        // Only the empty and localhost authorities are local
        let slash = authority_and_path.find('/')?;
        let (authority, path) = authority_and_path.split_at(slash);
        if !authority.is_empty() && !authority.eq_ignore_ascii_case("localhost") {
            return None;
        }
        path
    } else {
        rest
    };

    if !path.starts_with('/') {
        return None;
    }
    let decoded = percent_decode_str(path).decode_utf8().ok()?;
    Some(PathBuf::from(decoded.into_owned()))
}

/// Encode paths as URI lines, each terminated by CRLF
pub fn encode_uri_list(paths: &[String], charset: Charset) -> Vec<u8> {
    let eoln = charset.encode("\r\n");
    let mut bytes = Vec::new();
    for path in paths {
        bytes.extend_from_slice(&charset.encode(&path_to_file_uri(path)));
        bytes.extend_from_slice(&eoln);
    }
    bytes
}

/// Parse URI list text, skipping comments and non-local URIs
pub fn parse_uri_list(text: &str) -> Vec<PathBuf> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let path = file_uri_to_path(line);
            if path.is_none() {
                trace!(uri = line, "Dropping non-local URI");
            }
            path
        })
        .collect()
}

// =============================================================================
// Permissions
// =============================================================================

/// Capability check: may the current context read `path`?
pub trait ReadPermission: Send + Sync {
    /// Whether reading `path` is permitted
    fn can_read(&self, path: &Path) -> bool;
}

impl<F> ReadPermission for F
where
    F: Fn(&Path) -> bool + Send + Sync,
{
    fn can_read(&self, path: &Path) -> bool {
        self(path)
    }
}

/// Grants access to anything the process can actually open
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemReadPermission;

impl ReadPermission for FilesystemReadPermission {
    fn can_read(&self, path: &Path) -> bool {
        if path.is_dir() {
            std::fs::read_dir(path).is_ok()
        } else {
            std::fs::File::open(path).is_ok()
        }
    }
}

/// Untrusted cache directories, resolved once on first use.
///
/// Each key is looked up in the configured properties first and then in the
/// environment (upper-cased, dots as underscores).
#[derive(Debug)]
pub struct UntrustedCacheDirs {
    properties: HashMap<String, String>,
    dirs: Mutex<Option<Vec<PathBuf>>>,
}

impl UntrustedCacheDirs {
    /// Create from configured properties
    pub fn new(properties: HashMap<String, String>) -> Self {
        Self {
            properties,
            dirs: Mutex::new(None),
        }
    }

    fn lookup(&self, key: &str) -> Option<String> {
        self.properties.get(key).cloned().or_else(|| {
            let env_key = key.to_ascii_uppercase().replace('.', "_");
            std::env::var(env_key).ok()
        })
    }

    /// Resolved directories
    pub fn dirs(&self) -> Vec<PathBuf> {
        let mut guard = self.dirs.lock();
        guard
            .get_or_insert_with(|| {
                let dirs: Vec<PathBuf> = CACHE_DIR_PROPERTY_KEYS
                    .iter()
                    .filter_map(|key| self.lookup(key))
                    .filter_map(|dir| std::fs::canonicalize(dir).ok())
                    .collect();
                debug!(count = dirs.len(), "Resolved untrusted cache directories");
                dirs
            })
            .clone()
    }

    /// Whether `path` lies inside one of the directories
    pub fn contains(&self, path: &Path) -> bool {
        let dirs = self.dirs();
        if dirs.is_empty() {
            return false;
        }
        let path = canonical_or_absolute(path);
        path.ancestors().any(|dir| dirs.iter().any(|cache| cache == dir))
    }
}

impl Default for UntrustedCacheDirs {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

/// Canonical form of `path`, or its absolute form when it does not exist
pub fn canonical_or_absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        }
    })
}

/// Canonicalize `paths` for export, keeping their order.
///
/// With a policy in force, paths it refuses and paths inside untrusted caches
/// are silently dropped.
pub fn filter_exportable(
    paths: &[PathBuf],
    policy: Option<&dyn ReadPermission>,
    cache: &UntrustedCacheDirs,
) -> Vec<String> {
    paths
        .iter()
        .filter_map(|path| {
            let canonical = canonical_or_absolute(path);
            if let Some(policy) = policy {
                if cache.contains(&canonical) || !policy.can_read(&canonical) {
                    debug!(path = %canonical.display(), "Dropping file not permitted for export");
                    return None;
                }
            }
            Some(canonical.to_string_lossy().into_owned())
        })
        .collect()
}

/// Drop whitespace-separated entries of a URI-list string that do not
/// exist, are not readable or sit in an untrusted cache. Survivors are
/// joined with CRLF.
pub fn remove_suspected_data(
    text: &str,
    policy: &dyn ReadPermission,
    cache: &UntrustedCacheDirs,
) -> String {
    text.split_whitespace()
        .filter(|name| {
            let path = Path::new(name);
            let keep = path.exists() && !cache.contains(path) && policy.can_read(path);
            if !keep {
                debug!(entry = name, "Dropping suspected URI-list entry");
            }
            keep
        })
        .collect::<Vec<_>>()
        .join("\r\n")
}
