//! XRF source parser.
//!
//! Whitespace separates chunks; every other character must be one of the hex
//! digits `0`–`F`. Errors are accumulated with their source positions and the
//! whole input is always consumed, so one pass reports everything; chunks are
//! only returned when the error list is empty.

use thiserror::Error;

use crate::ir::{Chunk, Command, COMMANDS_PER_CHUNK};
use crate::reader::SourceReader;

/// What went wrong at a particular source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("Chunk has too many commands.")]
    TooManyCommands,
    #[error("Chunk doesn't have enough commands.")]
    NotEnoughCommands,
    #[error("Invalid command character: {0}")]
    InvalidCharacter(char),
}

/// A positional parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Error on line {line}, column {col}: {kind}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub line: u32,
    pub col: u32,
}

/// Parses XRF source text into chunks.
///
/// Returns the chunk list iff no errors were found, otherwise every error in
/// source order.
pub fn parse_source(source: &str) -> Result<Vec<Chunk>, Vec<ParseError>> {
    let mut reader = SourceReader::new(source);
    let mut chunks = Vec::new();
    let mut errors = Vec::new();

    while let Some(c) = reader.read() {
        if !c.is_whitespace() {
            parse_chunk(&mut reader, c, &mut chunks, &mut errors);
        }
    }

    if errors.is_empty() {
        Ok(chunks)
    } else {
        Err(errors)
    }
}

fn parse_chunk(
    reader: &mut SourceReader,
    first: char,
    chunks: &mut Vec<Chunk>,
    errors: &mut Vec<ParseError>,
) {
    let mut chunk = Chunk {
        line: reader.line(),
        col: reader.column(),
        ..Chunk::default()
    };

    let mut next = Some(first);
    while let Some(c) = next {
        if c.is_whitespace() {
            break;
        }

        match Command::from_digit(c) {
            Some(command) => chunk.commands.push(command),
            None => errors.push(ParseError {
                kind: ParseErrorKind::InvalidCharacter(c),
                line: reader.line(),
                col: reader.column(),
            }),
        }

        next = reader.read();
    }

    if chunk.commands.len() < COMMANDS_PER_CHUNK {
        errors.push(ParseError {
            kind: ParseErrorKind::NotEnoughCommands,
            line: chunk.line,
            col: chunk.col,
        });
    } else if chunk.commands.len() > COMMANDS_PER_CHUNK {
        errors.push(ParseError {
            kind: ParseErrorKind::TooManyCommands,
            line: chunk.line,
            col: chunk.col,
        });
    } else {
        chunks.push(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chunks_with_positions() {
        let chunks = parse_source("01234 56789\n\n ABCDE FFFFF").unwrap();

        assert_eq!(chunks.len(), 4);

        assert_eq!((chunks[0].line, chunks[0].col), (1, 1));
        assert_eq!(
            chunks[0].commands,
            vec![
                Command::Input,
                Command::Output,
                Command::Pop,
                Command::Dup,
                Command::Swap,
            ]
        );

        assert_eq!((chunks[1].line, chunks[1].col), (1, 7));
        assert_eq!(
            chunks[1].commands,
            vec![
                Command::Inc,
                Command::Dec,
                Command::Add,
                Command::IgnoreFirst,
                Command::Bottom,
            ]
        );

        assert_eq!((chunks[2].line, chunks[2].col), (3, 2));
        assert_eq!(
            chunks[2].commands,
            vec![
                Command::Jump,
                Command::Exit,
                Command::IgnoreVisited,
                Command::Randomize,
                Command::Sub,
            ]
        );

        assert_eq!((chunks[3].line, chunks[3].col), (3, 8));
        assert_eq!(chunks[3].commands, vec![Command::Nop; 5]);
    }

    #[test]
    fn empty_input_parses_to_no_chunks() {
        assert_eq!(parse_source("").unwrap(), Vec::new());
        assert_eq!(parse_source(" \n\t ").unwrap(), Vec::new());
    }

    #[test]
    fn rejects_chunk_with_too_many_commands() {
        let errors = parse_source("000000").unwrap_err();

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ParseErrorKind::TooManyCommands);
        assert_eq!((errors[0].line, errors[0].col), (1, 1));
    }

    #[test]
    fn rejects_chunk_with_too_few_commands() {
        let errors = parse_source("   FFFF   ").unwrap_err();

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ParseErrorKind::NotEnoughCommands);
        assert_eq!((errors[0].line, errors[0].col), (1, 4));
    }

    #[test]
    fn rejects_invalid_command_character() {
        let errors = parse_source("0G1234").unwrap_err();

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ParseErrorKind::InvalidCharacter('G'));
        assert_eq!((errors[0].line, errors[0].col), (1, 2));
    }

    #[test]
    fn invalid_characters_do_not_count_toward_chunk_size() {
        // The remaining five valid digits form a well-sized chunk, so the
        // only error is the invalid character itself.
        let errors = parse_source("01G234").unwrap_err();

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ParseErrorKind::InvalidCharacter('G'));
    }

    #[test]
    fn accumulates_errors_across_chunks() {
        let errors = parse_source("0G1234 FFF").unwrap_err();

        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].kind, ParseErrorKind::InvalidCharacter('G'));
        assert_eq!(errors[1].kind, ParseErrorKind::NotEnoughCommands);
        assert_eq!((errors[1].line, errors[1].col), (1, 8));
    }

    #[test]
    fn errors_format_with_position() {
        let error = ParseError {
            kind: ParseErrorKind::InvalidCharacter('G'),
            line: 3,
            col: 7,
        };
        assert_eq!(
            error.to_string(),
            "Error on line 3, column 7: Invalid command character: G"
        );
    }
}
