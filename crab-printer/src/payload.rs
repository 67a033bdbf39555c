//! Print payloads and their protocol framing
//!
//! Callers hand the pipeline a [`PrintPayload`]; it is framed into ESC/POS
//! bytes here (initialize, format, cut). Business formatting of receipts
//! stays with the caller.

use serde::{Deserialize, Serialize};

use crate::encoding::TextEncoding;
use crate::escpos::EscPosBuilder;

/// Line alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

/// One element of a receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReceiptLine {
    Text {
        text: String,
        #[serde(default)]
        align: Align,
        #[serde(default)]
        bold: bool,
        #[serde(default)]
        double: bool,
    },
    /// Left and right text on one row
    Pair { left: String, right: String },
    /// Full-width rule
    Separator {
        #[serde(default = "default_rule")]
        ch: char,
    },
    Feed { lines: u8 },
}

fn default_rule() -> char {
    '-'
}

fn default_true() -> bool {
    true
}

/// Structured receipt
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReceiptDocument {
    pub lines: Vec<ReceiptLine>,
    /// Cut the paper after printing
    #[serde(default = "default_true")]
    pub cut: bool,
}

impl ReceiptDocument {
    pub fn new() -> Self {
        Self {
            lines: Vec::new(),
            cut: true,
        }
    }

    /// Centered, bold, double-size heading
    pub fn title(mut self, text: impl Into<String>) -> Self {
        self.lines.push(ReceiptLine::Text {
            text: text.into(),
            align: Align::Center,
            bold: true,
            double: true,
        });
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.lines.push(ReceiptLine::Text {
            text: text.into(),
            align: Align::Left,
            bold: false,
            double: false,
        });
        self
    }

    pub fn pair(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.lines.push(ReceiptLine::Pair {
            left: left.into(),
            right: right.into(),
        });
        self
    }

    pub fn separator(mut self) -> Self {
        self.lines.push(ReceiptLine::Separator { ch: default_rule() });
        self
    }

    pub fn feed(mut self, lines: u8) -> Self {
        self.lines.push(ReceiptLine::Feed { lines });
        self
    }

    pub fn no_cut(mut self) -> Self {
        self.cut = false;
        self
    }
}

/// What to print
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PrintPayload {
    /// Pre-framed protocol bytes, sent as-is
    Raw(Vec<u8>),
    /// Plain text: initialize, text, feed, cut
    Text(String),
    Receipt(ReceiptDocument),
}

/// Paper and code page settings used when framing a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framing {
    /// Characters per line
    pub width: usize,
    pub encoding: TextEncoding,
    /// Lines fed before the cut
    pub feed_lines: u8,
}

impl Default for Framing {
    fn default() -> Self {
        Self {
            width: 32,
            encoding: TextEncoding::default(),
            feed_lines: 3,
        }
    }
}

impl PrintPayload {
    /// Frame the payload into protocol bytes
    pub fn encode(&self, framing: &Framing) -> Vec<u8> {
        match self {
            Self::Raw(bytes) => bytes.clone(),
            Self::Text(text) => {
                let mut b = EscPosBuilder::new(framing.width).with_encoding(framing.encoding);
                b.text(text);
                if !text.ends_with('\n') {
                    b.newline();
                }
                b.cut_feed(framing.feed_lines);
                b.build()
            }
            Self::Receipt(doc) => render_receipt(doc, framing),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Raw(bytes) => bytes.is_empty(),
            Self::Text(text) => text.is_empty(),
            Self::Receipt(doc) => doc.lines.is_empty(),
        }
    }
}

impl From<&str> for PrintPayload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for PrintPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Raw(bytes)
    }
}

impl From<ReceiptDocument> for PrintPayload {
    fn from(doc: ReceiptDocument) -> Self {
        Self::Receipt(doc)
    }
}

fn render_receipt(doc: &ReceiptDocument, framing: &Framing) -> Vec<u8> {
    let mut b = EscPosBuilder::new(framing.width).with_encoding(framing.encoding);

    for line in &doc.lines {
        match line {
            ReceiptLine::Text {
                text,
                align,
                bold,
                double,
            } => {
                match align {
                    Align::Left => b.left(),
                    Align::Center => b.center(),
                    Align::Right => b.right(),
                };
                if *bold {
                    b.bold();
                }
                if *double {
                    b.double_size();
                }
                b.line(text);
                if *double {
                    b.reset_size();
                }
                if *bold {
                    b.bold_off();
                }
                if *align != Align::Left {
                    b.left();
                }
            }
            ReceiptLine::Pair { left, right } => {
                b.line_lr(left, right);
            }
            ReceiptLine::Separator { ch } => {
                b.separator(*ch);
            }
            ReceiptLine::Feed { lines } => {
                b.feed(*lines);
            }
        }
    }

    if doc.cut {
        b.cut_feed(framing.feed_lines);
    }
    b.build()
}
