use porter_stemmer::stem;
use std::collections::HashSet;
use std::sync::OnceLock;

static STOP_WORDS: OnceLock<HashSet<String>> = OnceLock::new();

fn get_stop_words() -> &'static HashSet<String> {
    STOP_WORDS.get_or_init(|| {
        stop_words::get(stop_words::LANGUAGE::English)
            .into_iter()
            .map(|x| x.to_string())
            .collect()
    })
}

/// A character filter receives the original text and can transform it by adding,
/// removing, or changing characters before tokenization.
pub trait CharacterFilter: Send + Sync {
    fn filter(&self, text: String) -> String;
}

/// Drops every character that is not a word character, whitespace, or one of
/// `. , ! ? ; : ( ) - "`.
#[derive(Debug, Default)]
pub struct AllowListCharFilter;

impl AllowListCharFilter {
    pub fn is_allowed(c: char) -> bool {
        c.is_alphanumeric()
            || c == '_'
            || c.is_whitespace()
            || matches!(c, '.' | ',' | '!' | '?' | ';' | ':' | '(' | ')' | '-' | '"')
    }
}

impl CharacterFilter for AllowListCharFilter {
    fn filter(&self, text: String) -> String {
        text.chars().filter(|c| Self::is_allowed(*c)).collect()
    }
}

/// Collapses runs of whitespace into a single space and trims the ends.
#[derive(Debug, Default)]
pub struct WhitespaceCollapseFilter;

impl CharacterFilter for WhitespaceCollapseFilter {
    fn filter(&self, text: String) -> String {
        let mut out = String::with_capacity(text.len());
        for word in text.split_whitespace() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(word);
        }
        out
    }
}

/// A tokenizer breaks a stream of characters into individual tokens.
/// A whitespace tokenizer converts "Quick brown fox!" into [Quick, brown, fox!].
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: String) -> Vec<String>;
}

pub struct WhiteSpaceTokenizer;

impl Tokenizer for WhiteSpaceTokenizer {
    fn tokenize(&self, text: String) -> Vec<String> {
        text.split_whitespace()
            .map(|w| w.to_string())
            .collect::<Vec<String>>()
    }
}

/// A token filter receives the token stream and may add, remove, or change tokens.
pub trait TokenFilter: Send + Sync {
    fn filter(&self, tokens: Vec<TextToken>) -> Vec<TextToken>;
}

pub struct LowerCaseTokenFilter;

impl TokenFilter for LowerCaseTokenFilter {
    fn filter(&self, tokens: Vec<TextToken>) -> Vec<TextToken> {
        tokens
            .into_iter()
            .map(|mut t| {
                t.term = t.term.to_lowercase();
                t
            })
            .collect()
    }
}

pub struct StopWordTokenFilter;

impl TokenFilter for StopWordTokenFilter {
    fn filter(&self, mut tokens: Vec<TextToken>) -> Vec<TextToken> {
        let stop_words = get_stop_words();
        tokens.retain(|w| !stop_words.contains(&w.term));
        tokens
    }
}

pub struct PorterStemmerTokenFilter;

impl TokenFilter for PorterStemmerTokenFilter {
    fn filter(&self, tokens: Vec<TextToken>) -> Vec<TextToken> {
        tokens
            .into_iter()
            .map(|mut w| {
                w.term = stem(&w.term);
                w
            })
            .collect::<Vec<TextToken>>()
    }
}

/// Strips punctuation from tokens and filters out tokens that become empty or are too short
pub struct PunctuationStripFilter {
    min_length: usize,
}

impl Default for PunctuationStripFilter {
    fn default() -> Self {
        Self { min_length: 2 }
    }
}

impl TokenFilter for PunctuationStripFilter {
    fn filter(&self, tokens: Vec<TextToken>) -> Vec<TextToken> {
        tokens
            .into_iter()
            .filter_map(|mut token| {
                let trimmed: String = token
                    .term
                    .trim_matches(|c: char| !c.is_alphanumeric())
                    .to_string();

                if trimmed.chars().count() >= self.min_length
                    && trimmed.chars().any(|c| c.is_alphanumeric())
                {
                    token.term = trimmed;
                    Some(token)
                } else {
                    None
                }
            })
            .collect()
    }
}

/// Filters out tokens that are purely numeric (like "123", "45.67", etc.)
pub struct NumericTokenFilter;

impl TokenFilter for NumericTokenFilter {
    fn filter(&self, tokens: Vec<TextToken>) -> Vec<TextToken> {
        tokens
            .into_iter()
            .filter(|token| token.term.chars().any(|c| c.is_alphabetic()))
            .collect()
    }
}

/// Pure text analysis pipeline - no async, no I/O, just text transformations
pub struct TextAnalyzer {
    char_filters: Vec<Box<dyn CharacterFilter>>,
    tokenizer: Box<dyn Tokenizer>,
    token_filters: Vec<Box<dyn TokenFilter>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextToken {
    pub term: String,
}

impl TextAnalyzer {
    pub fn new(
        char_filters: Vec<Box<dyn CharacterFilter>>,
        tokenizer: Box<dyn Tokenizer>,
        token_filters: Vec<Box<dyn TokenFilter>>,
    ) -> Self {
        Self {
            char_filters,
            tokenizer,
            token_filters,
        }
    }

    /// Lower-cased whitespace words, nothing else removed. This is the word
    /// set keyword similarity is computed over.
    pub fn keyword() -> Self {
        Self::new(
            vec![],
            Box::new(WhiteSpaceTokenizer),
            vec![Box::new(LowerCaseTokenFilter)],
        )
    }

    /// Content-bearing stems: punctuation, numbers and stop words removed.
    pub fn terms() -> Self {
        Self::new(
            vec![],
            Box::new(WhiteSpaceTokenizer),
            vec![
                Box::new(PunctuationStripFilter::default()),
                Box::new(LowerCaseTokenFilter),
                Box::new(NumericTokenFilter),
                Box::new(StopWordTokenFilter),
                Box::new(PorterStemmerTokenFilter),
            ],
        )
    }

    /// Character-level cleanup applied to scraped text.
    pub fn cleanup() -> Self {
        Self::new(
            vec![
                Box::new(AllowListCharFilter),
                Box::new(WhitespaceCollapseFilter),
            ],
            Box::new(WhiteSpaceTokenizer),
            vec![],
        )
    }

    pub fn char_filter(&self, mut content: String) -> String {
        for filter in self.char_filters.iter() {
            content = filter.filter(content);
        }
        content
    }

    pub fn tokenize(&self, content: String) -> Vec<TextToken> {
        self.tokenizer
            .tokenize(content)
            .into_iter()
            .map(|term| TextToken { term })
            .collect()
    }

    pub fn token_filter(&self, mut tokens: Vec<TextToken>) -> Vec<TextToken> {
        for filter in self.token_filters.iter() {
            tokens = filter.filter(tokens);
        }
        tokens
    }

    /// Analyzes raw content and returns a list of tokens
    pub fn analyze(&self, raw_content: String) -> Vec<TextToken> {
        let content = self.char_filter(raw_content);
        let tokens = self.tokenize(content);
        self.token_filter(tokens)
    }

    pub fn term_set(&self, text: &str) -> HashSet<String> {
        self.analyze(text.to_string())
            .into_iter()
            .map(|t| t.term)
            .collect()
    }
}

/// |a ∩ b| / |a ∪ b|, zero when either side is empty.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f32 / union as f32
}
