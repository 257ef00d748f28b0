//! Parsing of the remote image catalog.
//!
//! The catalog is a plain-text file made of paragraphs ("stanzas") of
//! `key=value` lines, one stanza per selectable image. A handful of header
//! lines describing the tool version travel in the same file and are split
//! off before the stanzas are parsed.
use crate::checksum::ChecksumKind;
use std::fmt;
use tracing::{debug, warn};

const HEADER_TOOL_VERSION: &str = "recovery_tool_version=";
const HEADER_LINUX_VERSION: &str = "recovery_tool_linux_version=";
const HEADER_UPDATE: &str = "recovery_tool_update=";

/// Version information carried in the catalog header lines.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CatalogHeader {
    pub tool_version: Option<String>,
    pub linux_version: Option<String>,
    /// Free-form remediation text shown when the tool is out of date.
    pub update: Option<String>,
}

impl CatalogHeader {
    /// The version the catalog expects this tool to be. The Linux-specific
    /// declaration wins over the generic one.
    pub fn declared_version(&self) -> Option<&str> {
        self.linux_version
            .as_deref()
            .or(self.tool_version.as_deref())
    }
}

/// The raw catalog split into its two streams.
#[derive(Clone, Debug, Default)]
pub struct SplitCatalog {
    pub header: CatalogHeader,
    /// Header lines in their original order, as written to `version.txt`.
    pub header_lines: Vec<String>,
    /// Everything that is not a comment or a header line, as written to
    /// `config.txt`.
    pub stanza_text: String,
}

/// Separates comments, header lines and stanza text.
pub fn split(raw: &str) -> SplitCatalog {
    let mut out = SplitCatalog::default();

    for line in raw.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with('#') {
            continue;
        }

        if let Some(value) = line.strip_prefix(HEADER_LINUX_VERSION) {
            out.header.linux_version = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix(HEADER_TOOL_VERSION) {
            out.header.tool_version = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix(HEADER_UPDATE) {
            out.header.update = Some(value.to_string());
        } else {
            out.stanza_text.push_str(line);
            out.stanza_text.push('\n');
            continue;
        }
        out.header_lines.push(line.to_string());
    }

    out
}

/// One selectable image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageStanza {
    pub name: String,
    /// Name of the unpacked image inside the downloaded container.
    pub file: String,
    pub zip_file_size: u64,
    pub file_size: u64,
    pub url: String,
    pub md5: Option<String>,
    pub sha1: Option<String>,
}

impl ImageStanza {
    /// The expected digest for `kind`, if the catalog declared one.
    pub fn digest(&self, kind: ChecksumKind) -> Option<&str> {
        match kind {
            ChecksumKind::Md5 => self.md5.as_deref(),
            ChecksumKind::Sha1 => self.sha1.as_deref(),
        }
    }
}

impl fmt::Display for ImageStanza {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// The parsed catalog.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    /// Well-formed stanzas, in catalog order.
    pub records: Vec<ImageStanza>,
    /// `false` if any stanza was malformed or if the catalog was empty.
    pub valid: bool,
    /// Number of stanzas encountered, well-formed or not.
    pub count: usize,
}

impl Catalog {
    /// Looks a record up by its 1-based selection index.
    pub fn by_choice(&self, choice: usize) -> Option<&ImageStanza> {
        choice.checked_sub(1).and_then(|i| self.records.get(i))
    }

    /// Returns the 1-based index of the first record whose name contains
    /// `model`. The match is case-sensitive.
    pub fn find_by_model(&self, model: &str) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.name.contains(model))
            .map(|i| i + 1)
    }
}

/// Splits a line into `(key, value)`.
///
/// Accepts exactly one `=` with a non-empty key and a non-empty value.
pub fn tokenize(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    if key.is_empty() || value.is_empty() || value.contains('=') {
        return None;
    }
    Some((key, value))
}

#[derive(Default)]
struct StanzaBuilder {
    name: Option<String>,
    file: Option<String>,
    zip_file_size: Option<String>,
    file_size: Option<String>,
    url: Option<String>,
    md5: Option<String>,
    sha1: Option<String>,
    duplicate: Option<String>,
}

impl StanzaBuilder {
    fn push(&mut self, key: &str, value: &str) {
        let slot = match key {
            "name" => &mut self.name,
            "file" => &mut self.file,
            "zipfilesize" => &mut self.zip_file_size,
            "filesize" => &mut self.file_size,
            "url" => &mut self.url,
            "md5" => &mut self.md5,
            "sha1" => &mut self.sha1,
            _ => return,
        };
        if slot.is_some() {
            self.duplicate.get_or_insert_with(|| key.to_string());
        } else {
            *slot = Some(value.to_string());
        }
    }

    fn finish(self, required: ChecksumKind) -> Result<ImageStanza, String> {
        if let Some(key) = self.duplicate {
            return Err(format!("duplicate key '{key}'"));
        }

        let name = self.name.ok_or("missing 'name'")?;
        let file = self.file.ok_or("missing 'file'")?;
        let url = self.url.ok_or("missing 'url'")?;
        let zip_file_size = parse_size("zipfilesize", self.zip_file_size)?;
        let file_size = parse_size("filesize", self.file_size)?;

        let stanza = ImageStanza {
            name,
            file,
            zip_file_size,
            file_size,
            url,
            md5: self.md5,
            sha1: self.sha1,
        };
        if stanza.digest(required).is_none() {
            return Err(format!("missing '{}'", required.key()));
        }
        Ok(stanza)
    }
}

fn parse_size(key: &str, value: Option<String>) -> Result<u64, String> {
    let value = value.ok_or_else(|| format!("missing '{key}'"))?;
    value
        .parse::<u64>()
        .map_err(|_| format!("'{key}' is not a byte count: {value}"))
}

/// Parses stanza text into a [`Catalog`].
///
/// Malformed stanzas are skipped and make the whole catalog invalid, but
/// parsing always runs to the end of the text.
pub fn parse(text: &str, required: ChecksumKind) -> Catalog {
    let mut catalog = Catalog {
        valid: true,
        ..Default::default()
    };
    let mut current: Option<StanzaBuilder> = None;

    // The trailing blank line closes the final stanza.
    for line in text.lines().chain(std::iter::once("")) {
        let line = line.strip_suffix('\r').unwrap_or(line);

        // Only an empty line ends a stanza. Whitespace-only lines are
        // ordinary lines that fail to tokenize.
        if line.is_empty() {
            let Some(builder) = current.take() else {
                continue;
            };
            catalog.count += 1;
            match builder.finish(required) {
                Ok(stanza) => {
                    debug!("catalog stanza {}: {}", catalog.count, stanza.name);
                    catalog.records.push(stanza);
                }
                Err(reason) => {
                    warn!("catalog stanza {} is invalid: {}", catalog.count, reason);
                    catalog.valid = false;
                }
            }
            continue;
        }

        let builder = current.get_or_insert_with(StanzaBuilder::default);
        match tokenize(line) {
            Some((key, value)) => builder.push(key, value),
            None => debug!("ignoring catalog line: {line:?}"),
        }
    }

    if catalog.count == 0 {
        catalog.valid = false;
    }
    catalog
}
