//! Console grammar for the bench emulator.
//!
//! One command per line, lower-case keywords, decimal arguments:
//! `tick 250`, `gear p`, `key 7 long`, `bus off`.

use std::fmt;

use pdm_core::hal::KeyEvent;
use winnow::ascii::{dec_uint, space0, space1};
use winnow::combinator::{alt, cut_err, eof, preceded, terminated};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::prelude::*;

/// Gear lever byte as carried in the 0x1D2 frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Lever {
    Park,
    Reverse,
    Neutral,
    Drive,
}

impl Lever {
    pub const fn code(self) -> u8 {
        match self {
            Lever::Park => 0xe1,
            Lever::Reverse => 0xd2,
            Lever::Neutral => 0xb4,
            Lever::Drive => 0x78,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Tick(u32),
    Rpm(u16),
    Gear(Lever),
    Brake(bool),
    Lights(bool),
    Rain(bool),
    Reverse(bool),
    /// Periodic vehicle traffic on or off.
    Bus(bool),
    Kl15(u16),
    Kill(bool),
    Switch(u16),
    Key(u8, KeyEvent),
    /// `true` while the engine controller answers scans.
    Ecu(bool),
    Status,
    Outputs,
    Frames,
    Help,
    Exit,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseError {
    message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Parses one console line. Keywords are case-insensitive.
pub fn parse(line: &str) -> Result<Command, ParseError> {
    let lowered = line.trim().to_ascii_lowercase();
    terminated(command, (space0, eof))
        .parse(lowered.as_str())
        .map_err(|err| ParseError {
            message: format!("{}", err.inner()),
        })
}

fn command(input: &mut &str) -> ModalResult<Command> {
    alt((vehicle, bench, report))
        .context(StrContext::Label("command"))
        .context(StrContext::Expected(StrContextValue::Description(
            "a command; try `help`",
        )))
        .parse_next(input)
}

fn vehicle(input: &mut &str) -> ModalResult<Command> {
    alt((
        argument("rpm", dec_uint).map(Command::Rpm),
        argument("gear", lever).map(Command::Gear),
        argument("brake", switch).map(Command::Brake),
        argument("lights", switch).map(Command::Lights),
        argument("rain", switch).map(Command::Rain),
        argument("reverse", switch).map(Command::Reverse),
        argument("bus", switch).map(Command::Bus),
    ))
    .parse_next(input)
}

fn bench(input: &mut &str) -> ModalResult<Command> {
    alt((
        argument("tick", dec_uint).map(Command::Tick),
        argument("kl15", dec_uint).map(Command::Kl15),
        argument("kill", switch).map(Command::Kill),
        argument("switch", dec_uint).map(Command::Switch),
        argument("key", (dec_uint, preceded(space1, key_event)))
            .map(|(key, event)| Command::Key(key, event)),
        argument("ecu", alt(("ok".value(true), "silent".value(false)))).map(Command::Ecu),
    ))
    .parse_next(input)
}

fn report(input: &mut &str) -> ModalResult<Command> {
    alt((
        "status".value(Command::Status),
        "outputs".value(Command::Outputs),
        "frames".value(Command::Frames),
        "help".value(Command::Help),
        alt(("exit", "quit")).value(Command::Exit),
    ))
    .parse_next(input)
}

/// `keyword <value>`; once the keyword matches, a bad value is a hard error.
fn argument<'i, O>(
    keyword: &'static str,
    value: impl Parser<&'i str, O, ErrMode<ContextError>>,
) -> impl Parser<&'i str, O, ErrMode<ContextError>> {
    preceded((keyword, space1), cut_err(value))
}

fn switch(input: &mut &str) -> ModalResult<bool> {
    alt(("on".value(true), "off".value(false)))
        .context(StrContext::Expected(StrContextValue::Description("on|off")))
        .parse_next(input)
}

fn lever(input: &mut &str) -> ModalResult<Lever> {
    alt((
        "p".value(Lever::Park),
        "r".value(Lever::Reverse),
        "n".value(Lever::Neutral),
        "d".value(Lever::Drive),
    ))
    .context(StrContext::Expected(StrContextValue::Description("p|r|n|d")))
    .parse_next(input)
}

fn key_event(input: &mut &str) -> ModalResult<KeyEvent> {
    alt((
        "short".value(KeyEvent::ShortPress),
        "long3".value(KeyEvent::LongPress3),
        "long2".value(KeyEvent::LongPress2),
        "long".value(KeyEvent::LongPress1),
        "release".value(KeyEvent::Release),
        "disconnect".value(KeyEvent::Disconnected),
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "short|long|long2|long3|release|disconnect",
    )))
    .parse_next(input)
}
