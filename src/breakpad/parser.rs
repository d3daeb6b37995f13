//! Parser for Breakpad symbol files.
//!
//! See <https://github.com/google/breakpad/blob/main/docs/symbol_files.md>

use std::collections::HashMap;
use std::str;

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::bytes::complete::take_while;
use nom::character::complete::hex_digit1;
use nom::character::complete::multispace0;
use nom::character::complete::space1;
use nom::combinator::cut;
use nom::combinator::map;
use nom::combinator::map_res;
use nom::combinator::opt;
use nom::error::ErrorKind;
use nom::error::ParseError as _;
use nom::error::VerboseError;
use nom::sequence::preceded;
use nom::sequence::terminated;
use nom::sequence::tuple;
use nom::Err;
use nom::IResult;
use nom::Needed;

use crate::Addr;
use crate::Error;
use crate::Result;


type Input<'dat> = &'dat [u8];
type ParseResult<'dat, O> = IResult<Input<'dat>, O, VerboseError<Input<'dat>>>;


/// A PUBLIC record, describing an exported symbol without size data.
#[derive(Debug)]
pub(crate) struct PublicSymbol {
    pub addr: Addr,
    pub name: String,
}

/// A line record in the body of a FUNC record.
#[derive(Debug)]
pub(crate) struct SourceLine {
    pub addr: Addr,
    pub file: u32,
    pub line: u32,
}

/// A FUNC record, together with its line records.
#[derive(Debug)]
pub(crate) struct Function {
    pub addr: Addr,
    pub size: u32,
    pub name: String,
    pub lines: Vec<SourceLine>,
}

/// The relevant contents of one parsed symbol file.
#[derive(Debug, Default)]
pub(crate) struct SymbolData {
    pub files: HashMap<u32, String>,
    pub publics: Vec<PublicSymbol>,
    pub functions: Vec<Function>,
}


#[derive(Debug)]
enum Line {
    File(u32, String),
    Public(PublicSymbol),
    Function(Function),
    /// A syntactically understood record carrying no data we use.
    Ignored,
}


/// Match a hex string of up to 16 digits, parse it to a u64.
fn hex_u64(input: Input<'_>) -> ParseResult<'_, u64> {
    let mut value = 0u64;
    let mut used = 0;
    for b in input.iter().take(16) {
        match (*b as char).to_digit(16) {
            Some(digit) => {
                value = value << 4 | u64::from(digit);
                used += 1;
            }
            None => break,
        }
    }
    if used == 0 {
        return Err(Err::Error(VerboseError::from_error_kind(
            input,
            ErrorKind::HexDigit,
        )))
    }
    Ok((&input[used..], value))
}

/// Match a hex string of up to 8 digits, parse it to a u32.
fn hex_u32(input: Input<'_>) -> ParseResult<'_, u32> {
    let mut value = 0u32;
    let mut used = 0;
    for b in input.iter().take(8) {
        match (*b as char).to_digit(16) {
            Some(digit) => {
                value = value << 4 | digit;
                used += 1;
            }
            None => break,
        }
    }
    if used == 0 {
        return Err(Err::Error(VerboseError::from_error_kind(
            input,
            ErrorKind::HexDigit,
        )))
    }
    Ok((&input[used..], value))
}

/// Match a decimal string, parse it to a u32.
fn decimal_u32(input: Input<'_>) -> ParseResult<'_, u32> {
    // u32::MAX has 10 decimal digits.
    const MAX_LEN: usize = 10;

    let mut value = 0u64;
    let mut used = 0;
    for b in input.iter().take(MAX_LEN) {
        match (*b as char).to_digit(10) {
            Some(digit) => {
                value = value * 10 + u64::from(digit);
                used += 1;
            }
            None => break,
        }
    }
    if used == 0 {
        return Err(Err::Error(VerboseError::from_error_kind(
            input,
            ErrorKind::Digit,
        )))
    }
    let value = u32::try_from(value)
        .map_err(|_| Err::Error(VerboseError::from_error_kind(input, ErrorKind::TooLarge)))?;
    Ok((&input[used..], value))
}

/// Take 0 or more non-space bytes.
fn non_space(input: Input<'_>) -> ParseResult<'_, &[u8]> {
    take_while(|b: u8| b != b' ')(input)
}

/// Accept `\n` with an arbitrary number of preceding `\r` bytes.
fn my_eol(input: Input<'_>) -> ParseResult<'_, &[u8]> {
    preceded(take_while(|b| b == b'\r'), tag(b"\n"))(input)
}

/// Accept everything except `\r` and `\n`.
fn not_my_eol(input: Input<'_>) -> ParseResult<'_, &[u8]> {
    take_while(|b| b != b'\r' && b != b'\n')(input)
}

/// Matches a MODULE record.
fn module_line(input: Input<'_>) -> ParseResult<'_, ()> {
    let (input, _) = terminated(tag("MODULE"), space1)(input)?;
    let (input, _) = cut(tuple((
        terminated(non_space, space1),  // os
        terminated(non_space, space1),  // cpu
        terminated(hex_digit1, space1), // debug id
        terminated(not_my_eol, my_eol), // filename
    )))(input)?;
    Ok((input, ()))
}

/// Matches an INFO record of any flavor.
fn info_line(input: Input<'_>) -> ParseResult<'_, ()> {
    let (input, _) = terminated(tag("INFO"), space1)(input)?;
    let (input, _) = cut(terminated(not_my_eol, my_eol))(input)?;
    Ok((input, ()))
}

/// Matches a FILE record.
fn file_line(input: Input<'_>) -> ParseResult<'_, (u32, String)> {
    let (input, _) = terminated(tag("FILE"), space1)(input)?;
    let (input, (id, filename)) = cut(tuple((
        terminated(decimal_u32, space1),
        terminated(map_res(not_my_eol, str::from_utf8), my_eol),
    )))(input)?;
    Ok((input, (id, filename.to_string())))
}

/// Matches an INLINE_ORIGIN record, whose data we do not use.
fn inline_origin_line(input: Input<'_>) -> ParseResult<'_, ()> {
    let (input, _) = terminated(tag("INLINE_ORIGIN"), space1)(input)?;
    let (input, _) = cut(tuple((
        terminated(decimal_u32, space1),
        terminated(not_my_eol, my_eol),
    )))(input)?;
    Ok((input, ()))
}

/// Matches a PUBLIC record.
fn public_line(input: Input<'_>) -> ParseResult<'_, PublicSymbol> {
    let (input, _) = terminated(tag("PUBLIC"), space1)(input)?;
    let (input, (_multiple, addr, _parameter_size, name)) = cut(tuple((
        opt(terminated(tag("m"), space1)),
        terminated(hex_u64, space1),
        terminated(hex_u32, space1),
        terminated(map_res(not_my_eol, str::from_utf8), my_eol),
    )))(input)?;
    Ok((
        input,
        PublicSymbol {
            addr,
            name: name.to_string(),
        },
    ))
}

/// Matches a FUNC record, without its body.
fn func_line(input: Input<'_>) -> ParseResult<'_, Function> {
    let (input, _) = terminated(tag("FUNC"), space1)(input)?;
    let (input, (_multiple, addr, size, _parameter_size, name)) = cut(tuple((
        opt(terminated(tag("m"), space1)),
        terminated(hex_u64, space1),
        terminated(hex_u32, space1),
        terminated(hex_u32, space1),
        terminated(map_res(not_my_eol, str::from_utf8), my_eol),
    )))(input)?;
    Ok((
        input,
        Function {
            addr,
            size,
            name: name.to_string(),
            lines: Vec::new(),
        },
    ))
}

/// Matches line data in the body of a FUNC record.
fn func_line_data(input: Input<'_>) -> ParseResult<'_, SourceLine> {
    let (input, (addr, _size, line, file)) = tuple((
        terminated(hex_u64, space1),
        terminated(hex_u32, space1),
        terminated(decimal_u32, space1),
        terminated(decimal_u32, my_eol),
    ))(input)?;
    Ok((input, SourceLine { addr, file, line }))
}

/// Matches an INLINE record in the body of a FUNC record, whose data we
/// do not use.
fn inline_line(input: Input<'_>) -> ParseResult<'_, ()> {
    let (input, _) = terminated(tag("INLINE"), space1)(input)?;
    let (input, _) = cut(tuple((
        terminated(decimal_u32, space1),
        terminated(not_my_eol, my_eol),
    )))(input)?;
    Ok((input, ()))
}

/// Matches STACK WIN, STACK CFI, and STACK CFI INIT records, whose data
/// we do not use.
fn stack_line(input: Input<'_>) -> ParseResult<'_, ()> {
    let (input, _) = terminated(tag("STACK"), space1)(input)?;
    let (input, _) = cut(terminated(not_my_eol, my_eol))(input)?;
    Ok((input, ()))
}

/// Parse any top-level record of a symbol file.
fn line(input: Input<'_>) -> ParseResult<'_, Line> {
    terminated(
        alt((
            map(module_line, |()| Line::Ignored),
            map(info_line, |()| Line::Ignored),
            map(file_line, |(id, file)| Line::File(id, file)),
            map(inline_origin_line, |()| Line::Ignored),
            map(public_line, Line::Public),
            map(func_line, Line::Function),
            map(stack_line, |()| Line::Ignored),
        )),
        multispace0,
    )(input)
}

/// Parse one line of the body of a FUNC record.
fn func_subline<'dat>(
    input: Input<'dat>,
    function: &mut Function,
) -> ParseResult<'dat, ()> {
    let (input, ()) = terminated(
        alt((
            inline_line,
            map(func_line_data, |line| function.lines.push(line)),
        )),
        multispace0,
    )(input)?;
    Ok((input, ()))
}


fn convert_parse_error(err: Err<VerboseError<Input<'_>>>) -> Error {
    match err {
        Err::Incomplete(Needed::Unknown) => {
            Error::with_invalid_data("symbol file input is truncated")
        }
        Err::Incomplete(Needed::Size(num)) => Error::with_invalid_data(format!(
            "symbol file input is truncated; {num} additional bytes are necessary"
        )),
        Err::Error(err) | Err::Failure(err) => {
            let line = err
                .errors
                .first()
                .map(|(input, _kind)| {
                    let end = input
                        .iter()
                        .position(|&b| b == b'\n')
                        .unwrap_or(input.len());
                    String::from_utf8_lossy(&input[..end]).into_owned()
                })
                .unwrap_or_default();
            Error::with_invalid_data(format!("malformed symbol file record: {line}"))
        }
    }
}

/// Parse the contents of a complete symbol file.
pub(crate) fn parse(data: &[u8]) -> Result<SymbolData> {
    let mut symbols = SymbolData::default();
    let (mut input, _) = multispace0::<_, VerboseError<Input<'_>>>(data)
        .map_err(convert_parse_error)?;

    while !input.is_empty() {
        let (rest, parsed) = line(input).map_err(convert_parse_error)?;
        input = rest;

        match parsed {
            Line::File(id, file) => {
                let _prev = symbols.files.insert(id, file);
            }
            Line::Public(public) => symbols.publics.push(public),
            Line::Function(mut function) => {
                // The body extends until the first line that fails to
                // parse as a subline, which starts the next record.
                while let Ok((rest, ())) = func_subline(input, &mut function) {
                    input = rest;
                }
                symbols.functions.push(function);
            }
            Line::Ignored => (),
        }
    }
    Ok(symbols)
}


#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;


    const SYM_FILE: &[u8] = b"MODULE Linux x86_64 BF2B0B2A10AF0000 demo.so
INFO CODE_ID 2A0B2BBFAF10
FILE 0 /src/a.c
FILE 1 /src/b.c
INLINE_ORIGIN 0 inlined_helper()
PUBLIC 1000 0 export_entry
FUNC 100 80 0 main_routine
100 20 10 0
INLINE 0 12 0 0 120 8
120 40 20 0
FUNC m 200 40 0 helper_routine
200 40 7 1
STACK CFI INIT 100 80 .cfa: $rsp 8 +
STACK CFI 110 .cfa: $rsp 16 +
";

    /// Check that the relevant records of a symbol file are extracted.
    #[test]
    fn file_parsing() {
        let symbols = parse(SYM_FILE).unwrap();
        assert_eq!(symbols.files.len(), 2);
        assert_eq!(symbols.files[&0], "/src/a.c");

        assert_eq!(symbols.publics.len(), 1);
        assert_eq!(symbols.publics[0].addr, 0x1000);
        assert_eq!(symbols.publics[0].name, "export_entry");

        assert_eq!(symbols.functions.len(), 2);
        let main = &symbols.functions[0];
        assert_eq!(main.addr, 0x100);
        assert_eq!(main.size, 0x80);
        assert_eq!(main.name, "main_routine");
        assert_eq!(main.lines.len(), 2);
        assert_eq!(main.lines[1].addr, 0x120);
        assert_eq!(main.lines[1].line, 20);

        let helper = &symbols.functions[1];
        assert_eq!(helper.name, "helper_routine");
        assert_eq!(helper.lines.len(), 1);
        assert_eq!(helper.lines[0].file, 1);
    }

    /// Check the error reported for an unrecognized record.
    #[test]
    fn malformed_record() {
        let err = parse(b"BOGUS RECORD DATA\n").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidData);
        assert!(err.to_string().contains("BOGUS"), "{err}");
    }
}
