use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_till1, take_while},
    character::complete::{char, digit1, hex_digit1, oct_digit1, one_of},
    combinator::{all_consuming, opt, verify},
    sequence::preceded,
};

use crate::Error;
use crate::cell::{Heap, Value};
use crate::symbol::SymbolTable;

/// Whitespace as the C locale defines it, vertical tab included.
fn is_space(c: char) -> bool {
    c.is_ascii_whitespace() || c == '\x0b'
}

fn is_delimiter(c: char) -> bool {
    is_space(c) || c == '(' || c == ')'
}

fn whitespace(input: &str) -> IResult<&str, &str> {
    take_while(is_space).parse(input)
}

/// A token runs until whitespace or a parenthesis.
fn token(input: &str) -> IResult<&str, &str> {
    take_till1(is_delimiter).parse(input)
}

fn hexadecimal(input: &str) -> IResult<&str, (u32, &str)> {
    preceded(alt((tag("0x"), tag("0X"))), hex_digit1)
        .map(|digits| (16, digits))
        .parse(input)
}

fn octal(input: &str) -> IResult<&str, (u32, &str)> {
    preceded(char('0'), oct_digit1)
        .map(|digits| (8, digits))
        .parse(input)
}

/// `0`, or a digit run without a leading zero.
fn decimal(input: &str) -> IResult<&str, (u32, &str)> {
    verify(digit1, |digits: &str| digits == "0" || !digits.starts_with('0'))
        .map(|digits| (10, digits))
        .parse(input)
}

/// An optionally signed decimal, hexadecimal or octal literal filling the
/// whole token.
fn integer_literal(input: &str) -> IResult<&str, (bool, u32, &str)> {
    all_consuming((opt(one_of("+-")), alt((hexadecimal, octal, decimal))))
        .map(|(sign, (radix, digits))| (sign == Some('-'), radix, digits))
        .parse(input)
}

/// Classify a token as an integer. Literals outside the i64 range are not
/// integers.
pub fn parse_integer(token: &str) -> Option<i64> {
    let (_, (negative, radix, digits)) = integer_literal(token).ok()?;
    let magnitude = i128::from_str_radix(digits, radix).ok()?;
    let value = if negative { -magnitude } else { magnitude };
    i64::try_from(value).ok()
}

struct Reader<'a, 'h> {
    heap: &'h mut Heap,
    symbols: &'h mut SymbolTable,
    source: &'a str,
    rest: &'a str,
    max_depth: usize,
}

impl Reader<'_, '_> {
    fn offset(&self) -> usize {
        self.source.len() - self.rest.len()
    }

    fn skip_whitespace(&mut self) {
        if let Ok((rest, _)) = whitespace(self.rest) {
            self.rest = rest;
        }
    }

    /// Consume a single-byte syntax character.
    fn bump(&mut self) {
        self.rest = &self.rest[1..];
    }

    fn atom(&mut self, text: &str) -> Value {
        match parse_integer(text) {
            Some(n) => Value::Integer(n),
            None => Value::Symbol(self.symbols.intern(text)),
        }
    }

    /// Read the elements of the current list up to its closing parenthesis
    /// or the end of input.
    fn read_list(&mut self, depth: usize) -> Result<Value, Error> {
        if depth > self.max_depth {
            return Err(Error::too_deeply_nested(
                self.source,
                self.offset(),
                self.max_depth,
            ));
        }

        let mut elements = Vec::new();
        let tail = loop {
            self.skip_whitespace();
            let Some(c) = self.rest.chars().next() else {
                break Value::Nil;
            };
            match c {
                ')' => {
                    self.bump();
                    break Value::Nil;
                }
                '(' => {
                    self.bump();
                    let nested = self.read_list(depth + 1)?;
                    elements.push(nested);
                }
                '\'' => {
                    self.bump();
                    let rest = self.read_list(depth + 1)?;
                    break self.quote_first(rest)?;
                }
                '.' => {
                    self.bump();
                    let rest = self.read_list(depth + 1)?;
                    break self.heap.car(rest);
                }
                _ => {
                    let Ok((rest, text)) = token(self.rest) else {
                        break Value::Nil;
                    };
                    self.rest = rest;
                    let atom = self.atom(text);
                    elements.push(atom);
                }
            }
        };

        let mut result = tail;
        for &element in elements.iter().rev() {
            result = self.heap.cons(element, result)?;
        }
        Ok(result)
    }

    /// Wrap the first element of `rest` in a quote form: an atom `a` becomes
    /// `(quote a)` and a list `(a b)` becomes `(quote a b)`.
    fn quote_first(&mut self, rest: Value) -> Result<Value, Error> {
        let Value::Pair(id) = rest else {
            return Ok(Value::Nil);
        };
        let (first, remaining) = self.heap.pair(id);
        let quote = Value::Symbol(self.symbols.well_known().quote);
        let quoted = if first.is_pair() {
            self.heap.cons(quote, first)?
        } else {
            self.heap.list(&[quote, first])?
        };
        self.heap.cons(quoted, remaining)
    }
}

/// Parse the list of expressions at `cursor`, stopping after an unmatched
/// `)` or at end of input. The cursor is advanced past what was consumed.
///
/// The result is always a list (or `()`): the caller's text `sum 1 2` reads
/// as the same structure as `(sum 1 2)` does inside another list.
pub fn parse(
    heap: &mut Heap,
    symbols: &mut SymbolTable,
    cursor: &mut &str,
    max_depth: usize,
) -> Result<Value, Error> {
    let mut reader = Reader {
        heap,
        symbols,
        source: *cursor,
        rest: *cursor,
        max_depth,
    };
    let result = reader.read_list(0)?;
    *cursor = reader.rest;
    Ok(result)
}

/// Accumulates input one character at a time until a complete expression is
/// available: a newline seen while every `(` has been closed. Comments run
/// from `;` to the end of the line and are dropped.
#[derive(Debug, Default, Clone)]
pub struct LogicalLine {
    text: String,
    in_comment: bool,
    depth: i64,
}

impl LogicalLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one character. Returns true when the accumulated text is ready
    /// to be parsed.
    pub fn ingest(&mut self, c: char) -> bool {
        if self.in_comment {
            if c != '\n' {
                return false;
            }
            self.in_comment = false;
        }
        match c {
            ';' => {
                self.in_comment = true;
                return false;
            }
            '(' => self.depth += 1,
            ')' => self.depth -= 1,
            '\n' if self.depth <= 0 => return true,
            _ => {}
        }
        self.text.push(c);
        false
    }

    /// True if nothing but whitespace has been accumulated.
    pub fn is_blank(&self) -> bool {
        self.text.chars().all(is_space)
    }

    /// Whether every `(` seen so far has been closed.
    pub fn is_balanced(&self) -> bool {
        self.depth <= 0
    }

    pub fn reset(&mut self) {
        self.text.clear();
        self.in_comment = false;
        self.depth = 0;
    }

    /// Take the accumulated text and start a new line.
    pub fn take(&mut self) -> String {
        let text = std::mem::take(&mut self.text);
        self.reset();
        text
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ParseErrorKind;

    /// Structural rendering used to compare parse results without the printer.
    fn shape(heap: &Heap, symbols: &SymbolTable, value: Value) -> String {
        match value {
            Value::Nil => "nil".into(),
            Value::Integer(n) => n.to_string(),
            Value::Symbol(id) => symbols.name(id).into(),
            Value::Pair(id) => {
                let (car, cdr) = heap.pair(id);
                format!("[{} {}]", shape(heap, symbols, car), shape(heap, symbols, cdr))
            }
            other => format!("{other:?}"),
        }
    }

    fn read(input: &str) -> Result<String, Error> {
        let mut heap = Heap::new(1 << 16, 1 << 16);
        let mut symbols = SymbolTable::new();
        let mut cursor = input;
        let value = parse(&mut heap, &mut symbols, &mut cursor, 32)?;
        Ok(shape(&heap, &symbols, value))
    }

    #[test]
    fn test_integer_classification() {
        let cases = [
            ("42", Some(42)),
            ("12", Some(12)),
            ("100", Some(100)),
            ("30", Some(30)),
            ("-250000", Some(-250000)),
            ("-5", Some(-5)),
            ("+7", Some(7)),
            ("0", Some(0)),
            ("0x1f", Some(31)),
            ("0X1F", Some(31)),
            ("-0x10", Some(-16)),
            ("017", Some(15)),
            ("9223372036854775807", Some(i64::MAX)),
            ("-9223372036854775808", Some(i64::MIN)),
            ("9223372036854775808", None),
            ("99999999999999999999999999999999999999999", None),
            ("08", None),
            ("0x", None),
            ("-", None),
            ("+", None),
            ("12abc", None),
            ("abc", None),
            ("1.5", None),
        ];
        for (i, (token, expected)) in cases.iter().enumerate() {
            assert_eq!(parse_integer(token), *expected, "Integer test #{}: {token}", i + 1);
        }
    }

    #[test]
    fn test_parser_comprehensive() {
        let cases = vec![
            ("", "nil"),
            ("   ", "nil"),
            ("a", "[a nil]"),
            ("sum 1 2", "[sum [1 [2 nil]]]"),
            ("(sum 1 2)", "[[sum [1 [2 nil]]] nil]"),
            ("()", "[nil nil]"),
            ("a () b", "[a [nil [b nil]]]"),
            ("(a (b c)) d", "[[a [[b [c nil]] nil]] [d nil]]"),
            ("a . b", "[a b]"),
            ("a b . c", "[a [b c]]"),
            ("a . (b c)", "[a [b [c nil]]]"),
            ("a .", "[a nil]"),
            ("'a", "[[quote [a nil]] nil]"),
            ("'a b", "[[quote [a nil]] [b nil]]"),
            ("'(a b)", "[[quote [a [b nil]]] nil]"),
            ("'()", "[[quote [nil nil]] nil]"),
            ("x '", "[x nil]"),
            ("libc.strlen hello", "[libc.strlen [hello nil]]"),
            ("a) b", "[a nil]"),
            ("(a", "[[a nil] nil]"),
            ("f(x)y", "[f [[x nil] [y nil]]]"),
            ("\tx\x0by\n", "[x [y nil]]"),
            ("0x10 -3 010", "[16 [-3 [8 nil]]]"),
        ];
        for (i, (input, expected)) in cases.iter().enumerate() {
            let actual = read(input).unwrap();
            assert_eq!(actual, *expected, "Parse test #{}: {input:?}", i + 1);
        }
    }

    #[test]
    fn test_cursor_stops_after_closing_paren() {
        let mut heap = Heap::new(64, 64);
        let mut symbols = SymbolTable::new();
        let mut cursor = "a b) c d";
        let first = parse(&mut heap, &mut symbols, &mut cursor, 8).unwrap();
        assert_eq!(heap.list_len(first), 2);
        assert_eq!(cursor, " c d");
    }

    #[test]
    fn test_nesting_limit() {
        let deep = "(".repeat(40);
        let err = read(&deep).unwrap_err();
        match err {
            Error::ParseError(e) => assert_eq!(e.kind, ParseErrorKind::TooDeeplyNested),
            other => panic!("expected parse error, got {other:?}"),
        }
        assert!(read(&"(".repeat(30)).is_ok());
    }

    #[test]
    fn test_logical_line_waits_for_balance() {
        let mut line = LogicalLine::new();
        let mut completed = Vec::new();
        for c in "def f (lambda (x)\n  x) ; identity\n\n(f 3)\n".chars() {
            if line.ingest(c) {
                completed.push(line.take());
            }
        }
        assert_eq!(completed, vec!["def f (lambda (x)\n  x) ", "", "(f 3)"]);
        assert!(line.is_blank());
        assert!(line.is_balanced());
    }

    #[test]
    fn test_logical_line_ignores_parens_in_comments() {
        let mut line = LogicalLine::new();
        let done: Vec<bool> = "a ; (\n".chars().map(|c| line.ingest(c)).collect();
        assert_eq!(done.last(), Some(&true));
        assert_eq!(line.take(), "a ");
    }
}
