mod command;
mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::process;

use session::{BoardKind, Session};

fn main() -> io::Result<()> {
    let kind = parse_board().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: pdm-emulator [--board <head|tail>]");
        process::exit(2);
    });
    let mut session = Session::new(kind).unwrap_or_else(|err| {
        eprintln!("board construction failed: {err}");
        process::exit(1);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut line = String::new();

    writeln!(
        writer,
        "PDM bench emulator ({kind:?} unit). Type `help` for commands or `exit` to quit."
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        if reader.read_line(&mut line)? == 0 {
            writeln!(writer)?;
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        let reply = match command::parse(&line) {
            Ok(command) => session.handle(command),
            Err(err) => {
                writeln!(writer, "ERR syntax {err}")?;
                continue;
            }
        };
        for response in &reply.lines {
            writeln!(writer, "{response}")?;
        }
        if reply.exit {
            writeln!(writer, "Session closed.")?;
            break;
        }
    }

    Ok(())
}

fn parse_board() -> Result<BoardKind, String> {
    let mut args = env::args().skip(1);
    match args.next() {
        None => Ok(BoardKind::Head),
        Some(arg) => {
            if let Some(value) = arg.strip_prefix("--board=") {
                BoardKind::from_tag(value)
            } else if arg == "--board" {
                let value = args
                    .next()
                    .ok_or_else(|| "Expected value after --board".to_string())?;
                BoardKind::from_tag(&value)
            } else {
                BoardKind::from_tag(&arg)
            }
        }
    }
}
