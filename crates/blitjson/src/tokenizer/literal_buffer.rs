use super::Token;

/// Multi-byte sequences the tokenizer matches byte by byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Literal {
    Null,
    True,
    False,
    /// The UTF-8 byte order mark.
    Preamble,
}

impl Literal {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Literal::Null => "null",
            Literal::True => "true",
            Literal::False => "false",
            Literal::Preamble => "UTF8 Preamble",
        }
    }

    /// The token a completed literal produces. The preamble produces none.
    pub(crate) fn token(self) -> Option<Token> {
        match self {
            Literal::Null => Some(Token::Null),
            Literal::True => Some(Token::True),
            Literal::False => Some(Token::False),
            Literal::Preamble => None,
        }
    }
}

/// What happened after feeding one more byte into the literal matcher?
pub(crate) enum Step {
    /// Byte matched, but the literal is not finished yet.
    NeedMore,
    /// Byte matched *and* it was the last byte of the literal.
    Done(Literal),
    /// Byte did **not** match the expected byte.
    Reject,
}

/// `None` while no literal is in flight, otherwise the bytes still expected
/// and the literal being matched.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct ExpectedLiteralBuffer(Option<(&'static [u8], Literal)>);

impl ExpectedLiteralBuffer {
    pub(crate) fn none() -> Self {
        ExpectedLiteralBuffer(None)
    }

    /// Starts matching after the first byte (`n`, `t`, `f` or `0xEF`).
    pub(crate) fn new(first: u8) -> Self {
        match first {
            b'n' => ExpectedLiteralBuffer(Some((b"ull", Literal::Null))),
            b't' => ExpectedLiteralBuffer(Some((b"rue", Literal::True))),
            b'f' => ExpectedLiteralBuffer(Some((b"alse", Literal::False))),
            0xEF => ExpectedLiteralBuffer(Some((b"\xBB\xBF", Literal::Preamble))),
            _ => ExpectedLiteralBuffer::none(),
        }
    }

    /// The literal in flight.
    pub(crate) fn literal(&self) -> Option<Literal> {
        self.0.map(|(_, literal)| literal)
    }

    pub(crate) fn step(&mut self, b: u8) -> Step {
        let Some((bytes, literal)) = self.0.take() else {
            return Step::Reject;
        };

        match bytes.split_first() {
            Some((expected, rest)) if *expected == b => {
                if rest.is_empty() {
                    Step::Done(literal)
                } else {
                    self.0 = Some((rest, literal));
                    Step::NeedMore
                }
            }
            _ => {
                self.0 = Some((bytes, literal));
                Step::Reject
            }
        }
    }
}
