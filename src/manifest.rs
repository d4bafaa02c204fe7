use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

#[async_trait]
pub trait ManifestReader: Send + Sync {
    /// Read `appmanifest_<app_id>.acf` from a steamapps directory.
    async fn read_manifest(&self, steamapps_dir: &Path, app_id: &str) -> Option<Manifest>;
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ManifestError {
    #[error("unexpected '{0}' at token {1}")]
    Unexpected(String, usize),
    #[error("key '{0}' has no value")]
    MissingValue(String),
    #[error("unclosed section")]
    Unclosed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Str(String),
    Section(Vec<(String, KeyValue)>),
}

impl KeyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            KeyValue::Str(s) => Some(s),
            KeyValue::Section(_) => None,
        }
    }

    pub fn as_section(&self) -> Option<&[(String, KeyValue)]> {
        match self {
            KeyValue::Section(entries) => Some(entries),
            KeyValue::Str(_) => None,
        }
    }
}

/// Parsed app manifest. Lookups are case-insensitive, as in the tool's own files.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    fields: Vec<(String, KeyValue)>,
}

impl Manifest {
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let tokens = tokenize(text);
        let mut pos = 0;
        let mut root = parse_entries(&tokens, &mut pos, false)?;

        // Manifests wrap everything in a single "AppState" section.
        let fields = match root.as_mut_slice() {
            [(_, KeyValue::Section(inner))] => std::mem::take(inner),
            _ => root,
        };
        Ok(Self { fields })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        lookup(&self.fields, key).and_then(KeyValue::as_str)
    }

    pub fn section(&self, key: &str) -> Option<&[(String, KeyValue)]> {
        lookup(&self.fields, key).and_then(KeyValue::as_section)
    }

    pub fn app_id(&self) -> Option<&str> {
        self.get("appid")
    }

    pub fn name(&self) -> Option<&str> {
        self.get("name").filter(|n| !n.is_empty())
    }

    pub fn size_on_disk(&self) -> Option<u64> {
        self.get("SizeOnDisk")?.parse().ok()
    }

    pub fn build_id(&self) -> Option<u64> {
        self.get("buildid")?.parse().ok()
    }

    pub fn state_flags(&self) -> Option<u32> {
        self.get("StateFlags")?.parse().ok()
    }
}

fn lookup<'a>(entries: &'a [(String, KeyValue)], key: &str) -> Option<&'a KeyValue> {
    entries
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str(String),
    Open,
    Close,
}

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"//[^\n]*|"((?:[^"\\]|\\.)*)"|(\{)|(\})|([^\s"{}]+)"#).expect("valid token regex")
});

fn tokenize(text: &str) -> Vec<Token> {
    TOKEN_RE
        .captures_iter(text)
        .filter_map(|caps| {
            if let Some(quoted) = caps.get(1) {
                Some(Token::Str(unescape(quoted.as_str())))
            } else if caps.get(2).is_some() {
                Some(Token::Open)
            } else if caps.get(3).is_some() {
                Some(Token::Close)
            } else {
                caps.get(4).map(|bare| Token::Str(bare.as_str().to_string()))
            }
        })
        .collect()
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn parse_entries(
    tokens: &[Token],
    pos: &mut usize,
    nested: bool,
) -> Result<Vec<(String, KeyValue)>, ManifestError> {
    let mut entries = Vec::new();
    loop {
        let Some(token) = tokens.get(*pos) else {
            return if nested { Err(ManifestError::Unclosed) } else { Ok(entries) };
        };
        *pos += 1;

        let key = match token {
            Token::Str(key) => key.clone(),
            Token::Close if nested => return Ok(entries),
            Token::Close => return Err(ManifestError::Unexpected("}".into(), *pos - 1)),
            Token::Open => return Err(ManifestError::Unexpected("{".into(), *pos - 1)),
        };

        let value = match tokens.get(*pos) {
            Some(Token::Str(v)) => {
                *pos += 1;
                KeyValue::Str(v.clone())
            }
            Some(Token::Open) => {
                *pos += 1;
                KeyValue::Section(parse_entries(tokens, pos, true)?)
            }
            Some(Token::Close) | None => return Err(ManifestError::MissingValue(key)),
        };
        entries.push((key, value));
    }
}

/// Reads manifests straight from disk.
#[derive(Debug, Default, Clone)]
pub struct AcfManifestReader;

impl AcfManifestReader {
    pub fn manifest_path(steamapps_dir: &Path, app_id: &str) -> PathBuf {
        steamapps_dir.join(format!("appmanifest_{app_id}.acf"))
    }
}

#[async_trait]
impl ManifestReader for AcfManifestReader {
    async fn read_manifest(&self, steamapps_dir: &Path, app_id: &str) -> Option<Manifest> {
        if app_id.is_empty() || !app_id.bytes().all(|b| b.is_ascii_digit()) {
            tracing::debug!("Refusing manifest lookup for non-numeric app id {app_id:?}");
            return None;
        }

        let path = Self::manifest_path(steamapps_dir, app_id);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No manifest at {}", path.display());
                return None;
            }
            Err(e) => {
                tracing::warn!("Failed to read manifest {}: {e}", path.display());
                return None;
            }
        };

        match Manifest::parse(&text) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                tracing::warn!("Malformed manifest {}: {e}", path.display());
                None
            }
        }
    }
}
