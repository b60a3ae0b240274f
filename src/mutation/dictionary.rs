//! Token dictionary for the dictionary-based havoc operators.
//!
//! File format, one token per line: `name="token"`. Lines starting with `#`
//! and blank lines are skipped; the token is whatever sits between the first
//! and the second double-quote. Escapes are not interpreted.

use std::fs;
use std::io;
use std::path::Path;

use rand::seq::SliceRandom;
use rand::Rng;

#[derive(Debug, Default)]
pub struct Dictionary {
    tokens: Vec<Vec<u8>>,
}

impl Dictionary {
    /// Parses a token file. Lines without a quoted token are ignored.
    pub fn load(path: &Path) -> io::Result<Self> {
        let data = fs::read(path)?;
        let mut tokens = Vec::new();
        for line in data.split(|&byte| byte == b'\n') {
            if line.starts_with(b"#") || line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            if let Some(first) = line.iter().position(|&byte| byte == b'"') {
                let rest = &line[first + 1..];
                if let Some(second) = rest.iter().position(|&byte| byte == b'"') {
                    tokens.push(rest[..second].to_vec());
                }
            }
        }
        log::info!("loaded {} dictionary tokens from {}", tokens.len(), path.display());
        Ok(Self { tokens })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// A uniformly chosen token, or `None` for an empty dictionary.
    pub fn choose<R: Rng>(&self, rng: &mut R) -> Option<&[u8]> {
        self.tokens.choose(rng).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn parse(content: &[u8]) -> Dictionary {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.dict");
        fs::write(&path, content).unwrap();
        Dictionary::load(&path).unwrap()
    }

    #[test]
    fn parses_tokens_between_quotes() {
        let dict = parse(b"# http keywords\n\nGET=\"GET \"\npost=\"POST\"\n");
        assert_eq!(dict.len(), 2);
        let mut rng = StdRng::seed_from_u64(0);
        let token = dict.choose(&mut rng).unwrap();
        assert!(token == b"GET " || token == b"POST");
    }

    #[test]
    fn skips_comments_blanks_and_unterminated_tokens() {
        let dict = parse(b"# \"quoted comment\"\n   \nbroken=\"no end\nok=\"fine\"\n");
        assert_eq!(dict.len(), 1);
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(dict.choose(&mut rng).unwrap(), b"fine");
    }

    #[test]
    fn empty_dictionary_yields_no_token() {
        let dict = parse(b"# nothing here\n");
        assert!(dict.is_empty());
        let mut rng = StdRng::seed_from_u64(0);
        assert!(dict.choose(&mut rng).is_none());
    }
}
