//! Buffered html5ever tokenization.

use html5ever::tendril::StrTendril;
use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
};

/// Collects tokens and switches the tokenizer into raw text modes after the
/// tags whose content a browser does not parse as markup.
#[derive(Default)]
struct TokenCollector {
    tokens: Vec<Token>,
    at_end: bool,
    truncated: bool,
}

fn raw_kind(tag: &str) -> Option<RawKind> {
    match tag {
        "script" => Some(RawKind::ScriptData),
        "style" | "noscript" | "iframe" | "xmp" | "noembed" | "noframes" => {
            Some(RawKind::Rawtext)
        }
        "textarea" | "title" => Some(RawKind::Rcdata),
        _ => None,
    }
}

/// Whether an end-of-input parse error means markup was cut off.
///
/// Errors read "Saw EOF in state <State>" with exact errors on. A trailing
/// `<` or `</` (states `TagOpen` and `EndTagOpen`) is emitted as text, and
/// an unterminated character reference is emitted as written.
fn is_truncation(message: &str) -> bool {
    if !message.contains("EOF") || message.contains("character reference") {
        return false;
    }
    let state = message.rsplit("in state ").next().unwrap_or(message).trim();
    !matches!(state, "TagOpen" | "EndTagOpen")
}

impl TokenSink for TokenCollector {
    type Handle = ();

    fn process_token(&mut self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        match token {
            Token::ParseError(message) => {
                // Input that stops inside a tag, comment or doctype is only
                // reported once the tokenizer is told there is no more.
                if self.at_end && is_truncation(&message) {
                    self.truncated = true;
                }
                TokenSinkResult::Continue
            }
            Token::EOFToken => TokenSinkResult::Continue,
            Token::TagToken(tag) => {
                let next = match tag.kind {
                    TagKind::StartTag => raw_kind(&tag.name),
                    TagKind::EndTag => None,
                };
                self.tokens.push(Token::TagToken(tag));
                match next {
                    Some(kind) => TokenSinkResult::RawData(kind),
                    None => TokenSinkResult::Continue,
                }
            }
            other => {
                self.tokens.push(other);
                TokenSinkResult::Continue
            }
        }
    }
}

/// Tokenize a complete document.
///
/// Returns `None` when the input ends in the middle of markup.
pub(crate) fn tokenize(input: &str) -> Option<std::vec::IntoIter<Token>> {
    let mut queue = BufferQueue::default();
    queue.push_back(StrTendril::from_slice(input));

    let opts = TokenizerOpts {
        exact_errors: true,
        ..TokenizerOpts::default()
    };
    let mut tokenizer = Tokenizer::new(TokenCollector::default(), opts);
    let _ = tokenizer.feed(&mut queue);
    tokenizer.sink.at_end = true;
    tokenizer.end();

    let collector = tokenizer.sink;
    if collector.truncated {
        return None;
    }
    Some(collector.tokens.into_iter())
}
