use std::path::Path;

use crate::error::{OcrError, Result};

const BLANK_SYMBOL: &str = "<blank>";

/// Where the CTC blank token sits in the recognizer's class axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlankPosition {
    #[default]
    First,
    Last,
}

/// Class-index to symbol table for CTC decoding, with an explicit blank index.
#[derive(Debug, Clone)]
pub struct CharDictionary {
    symbols: Vec<String>,
    blank: usize,
}

impl CharDictionary {
    /// Builds a dictionary from the printable symbols, inserting the blank
    /// token at `blank`.
    pub fn new<S: Into<String>>(symbols: impl IntoIterator<Item = S>, blank: BlankPosition) -> Self {
        let mut symbols = symbols.into_iter().map(Into::into).collect::<Vec<String>>();
        let blank = match blank {
            BlankPosition::First => {
                symbols.insert(0, BLANK_SYMBOL.to_string());
                0
            }
            BlankPosition::Last => {
                symbols.push(BLANK_SYMBOL.to_string());
                symbols.len() - 1
            }
        };
        Self { symbols, blank }
    }

    /// Uses `symbols` as the complete class axis, blank included.
    pub fn with_blank_index<S: Into<String>>(
        symbols: impl IntoIterator<Item = S>,
        blank: usize,
    ) -> Result<Self> {
        let symbols = symbols.into_iter().map(Into::into).collect::<Vec<String>>();
        if blank >= symbols.len() {
            return Err(OcrError::InvalidConfig(format!(
                "blank index {blank} is outside a dictionary of {} symbols",
                symbols.len()
            )));
        }
        Ok(Self { symbols, blank })
    }

    /// Reads one symbol per line. A trailing space symbol is appended when
    /// `use_space_char` is set, as recognizers trained with spaces expect.
    pub fn from_keys_file(
        path: impl AsRef<Path>,
        use_space_char: bool,
        blank: BlankPosition,
    ) -> Result<Self> {
        let keys = std::fs::read_to_string(path.as_ref())?;
        let keys = keys
            .lines()
            .map(str::to_string)
            .chain(use_space_char.then(|| " ".to_string()));
        let dictionary = Self::new(keys, blank);
        log::debug!(
            "Loaded {} dictionary symbols from {}",
            dictionary.len(),
            path.as_ref().display()
        );
        Ok(dictionary)
    }

    pub fn blank_index(&self) -> usize {
        self.blank
    }

    /// Number of classes, blank included.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbol(&self, index: usize) -> Result<&str> {
        self.symbols
            .get(index)
            .map(String::as_str)
            .ok_or(OcrError::DictionaryIndex {
                index,
                len: self.symbols.len(),
            })
    }
}
