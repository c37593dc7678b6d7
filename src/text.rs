//! Conversions between the in-game text encoding and printable text.
//!
//! The game sends latin-1 bytes. Three bytes toggle formatting:
//! [UNDERLINE], [ITALIC] and [COLOR] (the latter followed by one color selector byte).
//! Everything else is drawn with the console font, approximated by [GLYPHS].

use crate::error::TemplateError;

pub const UNDERLINE: char = '\u{86}';
pub const ITALIC: char = '\u{87}';
pub const COLOR: char = '\u{88}';

/// Console font glyphs 0x00..0x1f.
const LOW_GLYPHS: [char; 32] = [
    '.', '-', '-', '-', '_', '*', 't', '.', 'N', '-', ' ', '#', '.', '>', '*', '*',
    '[', ']', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', '.', '<', '=', '>',
];

const fn build_glyphs() -> [char; 256] {
    let mut table = [' '; 256];
    let mut i = 0;
    while i < 128 {
        table[i] = if i < 32 {
            LOW_GLYPHS[i]
        } else if i == 127 {
            '<'
        } else {
            i as u8 as char
        };
        // the upper half is the same font drawn in an alternate color
        table[i + 128] = table[i];
        i += 1;
    }
    table
}

/// Byte to printable character substitution for the in-game font.
pub static GLYPHS: [char; 256] = build_glyphs();

/// Renders a message template into in-game text.
///
/// `{C}` becomes the color toggle, `{U}` underline and `{I}` italic.
/// `{{` and `}}` are literal braces; use [escape] on untrusted input.
///
/// ```
/// assert_eq!(dpbot::text::render("{U}hi{U}").unwrap(), "\u{86}hi\u{86}");
/// ```
pub fn render(template: &str) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    while let Some((offset, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                out.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some((_, '}')) => break,
                        Some((_, '{')) | None => return Err(TemplateError::UnbalancedBrace(offset)),
                        Some((_, c)) => name.push(c),
                    }
                }
                out.push(match name.as_str() {
                    "C" => COLOR,
                    "U" => UNDERLINE,
                    "I" => ITALIC,
                    _ => return Err(TemplateError::UnknownPlaceholder(name)),
                });
            }
            '}' => return Err(TemplateError::UnbalancedBrace(offset)),
            c => out.push(c),
        }
    }
    Ok(out)
}

/// Doubles braces so `text` survives [render] verbatim.
pub fn escape(text: &str) -> String {
    text.replace('{', "{{").replace('}', "}}")
}

/// Strips formatting bytes and maps the rest through [GLYPHS].
pub fn decode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            UNDERLINE | ITALIC => {}
            COLOR => {
                chars.next();
            }
            c if (c as u32) < 256 => out.push(GLYPHS[c as usize]),
            c => out.push(c),
        }
    }
    out
}

/// Encodes to latin-1; characters outside it become `?`.
pub fn encode_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(c as u32).unwrap_or(b'?'))
        .collect()
}

pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
