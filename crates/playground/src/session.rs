//! Sessions and the share-token codec.
//!
//! A session is the pair of language [`Mode`] and source text owned by the
//! editor. It travels in a URL fragment of the form `#m=<key>&c=<payload>`,
//! where the payload is the UTF-8 source encoded as unpadded URL-safe base64.
//! Mode keys are part of every link ever shared and must never change.

use core::{fmt, str::FromStr};

use base64::{
    Engine as _, alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::{error::DecodeError, host::Editor, sandbox::DocumentKind};

const MODE_KEY: &str = "m";
const CODE_KEY: &str = "c";
const MODE_KEY_LONG: &str = "mode";
const CODE_KEY_LONG: &str = "code";

const PAYLOAD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    #[serde(rename = "html")]
    Markup,
    #[serde(rename = "css")]
    Stylesheet,
    #[serde(rename = "js")]
    Script,
    #[serde(rename = "py")]
    Interpreted,
}

/// How a run of a given mode is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Render a sandbox document and hand it to the preview.
    Document(DocumentKind),
    /// Submit the source to the dynamic runtime.
    Interpreter,
}

impl Mode {
    pub const ALL: [Self; 4] = [
        Self::Markup,
        Self::Stylesheet,
        Self::Script,
        Self::Interpreted,
    ];

    pub const fn key(self) -> &'static str {
        match self {
            Self::Markup => "html",
            Self::Stylesheet => "css",
            Self::Script => "js",
            Self::Interpreted => "py",
        }
    }

    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.key() == key)
    }

    pub const fn strategy(self) -> Strategy {
        match self {
            Self::Markup => Strategy::Document(DocumentKind::Markup),
            Self::Stylesheet => Strategy::Document(DocumentKind::Stylesheet),
            Self::Script => Strategy::Document(DocumentKind::Script),
            Self::Interpreted => Strategy::Interpreter,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Mode {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_key(s).ok_or_else(|| DecodeError::UnknownMode(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Session {
    pub mode: Mode,
    pub source: String,
}

impl Session {
    pub fn new(mode: Mode, source: impl Into<String>) -> Self {
        Self {
            mode,
            source: source.into(),
        }
    }

    /// Built-in starter session for a mode.
    #[must_use]
    pub fn example(mode: Mode) -> Self {
        let source = match mode {
            Mode::Markup => {
                "<!doctype html>\n<html><body>\n  <h1>Hello, HTML preview</h1>\n  <p>Edit and press Run.</p>\n</body></html>"
            }
            Mode::Stylesheet => {
                "body { font-family: system-ui, sans-serif; background: #fafafa; }\nh3 { color: rebeccapurple; }"
            }
            Mode::Script => {
                "console.log('Hello from JavaScript');\ndocument.body.style.fontFamily = 'system-ui,Segoe UI,Arial';\ndocument.body.innerHTML = '<h1>JS ran</h1><p>Open console for logs.</p>';"
            }
            Mode::Interpreted => "print('Hello from Python')\n2+2",
        };
        Self::new(mode, source)
    }

    /// The session as a URL fragment, including the leading `#`.
    #[must_use]
    pub fn to_fragment(&self) -> String {
        format!("#{}", encode(self))
    }
}

/// Result of decoding a share token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub session: Session,
    pub warnings: Vec<DecodeError>,
}

impl Decoded {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Encode a session as `m=<key>&c=<payload>`.
#[must_use]
pub fn encode(session: &Session) -> String {
    format!(
        "{MODE_KEY}={}&{CODE_KEY}={}",
        session.mode.key(),
        PAYLOAD.encode(session.source.as_bytes())
    )
}

/// Decode a share token on top of `current`.
///
/// Fields missing from the token, or failing to decode, keep their value from
/// `current`. Problems are returned as warnings and logged; this never fails.
#[must_use]
pub fn decode(token: &str, current: &Session) -> Decoded {
    let token = token.strip_prefix('#').unwrap_or(token);
    let mut session = current.clone();
    let mut warnings = Vec::new();
    if token.trim().is_empty() {
        return Decoded { session, warnings };
    }

    let mut mode = None;
    let mut code = None;
    for (key, value) in url::form_urlencoded::parse(token.as_bytes()) {
        match key.as_ref() {
            MODE_KEY | MODE_KEY_LONG if mode.is_none() => mode = Some(value.into_owned()),
            CODE_KEY | CODE_KEY_LONG if code.is_none() => code = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(key) = mode {
        session.mode = key.parse().unwrap_or_else(|err| {
            warnings.push(err);
            Mode::Markup
        });
    }

    match code.as_deref().map(decode_payload) {
        Some(Ok(source)) => session.source = source,
        Some(Err(err)) => warnings.push(err),
        None => warnings.push(DecodeError::MissingCode),
    }

    for warning in &warnings {
        warn!(%warning, "Share token only partially restored");
    }
    Decoded { session, warnings }
}

fn decode_payload(payload: &str) -> Result<String, DecodeError> {
    // Older links carry the standard alphabet, and form decoding turns its `+`
    // into a space.
    let normalized: String = payload
        .trim()
        .chars()
        .map(|c| match c {
            '+' | ' ' => '-',
            '/' => '_',
            c => c,
        })
        .collect();
    let bytes = PAYLOAD
        .decode(normalized.as_bytes())
        .map_err(|e| DecodeError::InvalidPayload(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| DecodeError::InvalidPayload(e.to_string()))
}

/// Build a shareable link by replacing the fragment of `page`.
#[must_use]
pub fn share_link(page: &Url, session: &Session) -> Url {
    let mut url = page.clone();
    url.set_fragment(Some(&encode(session)));
    url
}

/// Apply a share token to the editor.
///
/// The editor is only touched when the token changes its session.
pub fn restore(editor: &dyn Editor, token: &str) -> Vec<DecodeError> {
    let current = Session::new(editor.mode(), editor.source());
    let Decoded { session, warnings } = decode(token, &current);
    if session != current {
        editor.replace(session);
    }
    warnings
}
