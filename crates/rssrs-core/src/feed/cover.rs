//! Cover image extraction from raw item markup
//!
//! Descriptions are arbitrary HTML fragments, frequently malformed. The
//! scanner here only understands `<img ...>` tags and their attributes and
//! never fails: anything it cannot make sense of is skipped.

use regex::Regex;
use url::Url;

use crate::config::CoverConfig;
use crate::{Error, Result};

/// Decides which embedded images are acceptable as a cover
#[derive(Debug, Clone, Default)]
pub struct CoverFilter {
    blocked_hosts: Vec<String>,
    blocked_patterns: Vec<Regex>,
}

impl CoverFilter {
    pub fn new(config: &CoverConfig) -> Result<Self> {
        let blocked_patterns = config
            .blocked_patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| Error::Config(format!("Invalid cover pattern '{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            blocked_hosts: config
                .blocked_hosts
                .iter()
                .map(|h| h.trim().trim_end_matches('/').to_ascii_lowercase())
                .map(|h| {
                    h.strip_prefix("https://")
                        .or_else(|| h.strip_prefix("http://"))
                        .unwrap_or(&h)
                        .to_string()
                })
                .filter(|h| !h.is_empty())
                .collect(),
            blocked_patterns,
        })
    }

    /// First image source in `markup` that is not ad-tagged or blocked
    pub fn first_image<'a>(&self, markup: &'a str) -> Option<&'a str> {
        ImgTags::new(markup).find_map(|attrs| {
            if attrs.get("data-link").is_some() {
                tracing::trace!("Skipping ad-tagged image");
                return None;
            }
            let src = attrs.get("src").flatten()?.trim();
            if src.is_empty() || self.is_blocked(src) {
                return None;
            }
            Some(src)
        })
    }

    /// Whether an image source is excluded by host or pattern
    pub fn is_blocked(&self, src: &str) -> bool {
        if let Some(host) = host_of(src) {
            let blocked = self
                .blocked_hosts
                .iter()
                .any(|b| host == *b || host.ends_with(&format!(".{}", b)));
            if blocked {
                return true;
            }
        }

        self.blocked_patterns.iter().any(|re| re.is_match(src))
    }
}

fn host_of(src: &str) -> Option<String> {
    let parsed = if src.starts_with("//") {
        Url::parse(&format!("https:{}", src))
    } else {
        Url::parse(src)
    };
    parsed
        .ok()?
        .host_str()
        .map(|h| h.to_ascii_lowercase())
}

/// Attributes of one tag, in document order
struct Attributes<'a>(Vec<(&'a str, Option<&'a str>)>);

impl<'a> Attributes<'a> {
    /// `Some(None)` for a bare attribute, `None` when absent
    fn get(&self, name: &str) -> Option<Option<&'a str>> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }
}

/// Iterator over the attribute lists of every `<img>` tag in a fragment
struct ImgTags<'a> {
    markup: &'a str,
    lower: String,
    pos: usize,
}

impl<'a> ImgTags<'a> {
    fn new(markup: &'a str) -> Self {
        Self {
            markup,
            // ASCII lowering keeps byte offsets aligned with `markup`
            lower: markup.to_ascii_lowercase(),
            pos: 0,
        }
    }
}

impl<'a> Iterator for ImgTags<'a> {
    type Item = Attributes<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let start = self.pos + self.lower.get(self.pos..)?.find("<img")?;
            let body_start = start + "<img".len();

            match self.lower.as_bytes().get(body_start) {
                Some(b) if b.is_ascii_whitespace() || *b == b'/' || *b == b'>' => {}
                Some(_) => {
                    // <imgfoo> or similar
                    self.pos = body_start;
                    continue;
                }
                None => {
                    self.pos = self.markup.len();
                    return None;
                }
            }

            let end = tag_end(self.markup, body_start);
            self.pos = (end + 1).min(self.markup.len());
            return Some(parse_attributes(&self.markup[body_start..end]));
        }
    }
}

/// Index of the `>` closing a tag, honoring quoted values
fn tag_end(markup: &str, from: usize) -> usize {
    let bytes = markup.as_bytes();
    let mut quote: Option<u8> = None;

    for (offset, &b) in bytes[from..].iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return from + offset,
            None => {}
        }
    }

    markup.len()
}

fn parse_attributes(body: &str) -> Attributes<'_> {
    let bytes = body.as_bytes();
    let mut attrs = Vec::new();
    let mut i = 0;

    let skip_ws = |mut i: usize| {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b'/') {
            i += 1;
        }
        i
    };

    loop {
        i = skip_ws(i);
        if i >= bytes.len() {
            break;
        }

        let name_start = i;
        while i < bytes.len()
            && !bytes[i].is_ascii_whitespace()
            && !matches!(bytes[i], b'=' | b'/' | b'>')
        {
            i += 1;
        }
        let name = &body[name_start..i];
        if name.is_empty() {
            // stray '=' or similar
            i += 1;
            continue;
        }

        let mut j = i;
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }

        if j < bytes.len() && bytes[j] == b'=' {
            j += 1;
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }

            let value = match bytes.get(j) {
                Some(&q) if q == b'"' || q == b'\'' => {
                    let value_start = j + 1;
                    let value_end = body[value_start..]
                        .find(q as char)
                        .map(|e| value_start + e)
                        .unwrap_or(body.len());
                    i = (value_end + 1).min(body.len());
                    &body[value_start..value_end]
                }
                Some(_) => {
                    let value_start = j;
                    while j < bytes.len() && !bytes[j].is_ascii_whitespace() && bytes[j] != b'>' {
                        j += 1;
                    }
                    i = j;
                    &body[value_start..j]
                }
                None => {
                    i = j;
                    ""
                }
            };
            attrs.push((name, Some(value)));
        } else {
            attrs.push((name, None));
        }
    }

    Attributes(attrs)
}
