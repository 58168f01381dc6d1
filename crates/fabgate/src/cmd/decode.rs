use fabgate_wire::{parse, Frame};

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, io_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_frames, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let data = match (&args.file, &args.hex) {
        (_, Some(hex)) => decode_hex(hex)?,
        (Some(path), None) => {
            std::fs::read(path).map_err(|err| io_error("capture not readable", err))?
        }
        (None, None) => {
            return Err(CliError::new(
                USAGE,
                "a capture file or --hex string is required",
            ))
        }
    };

    let mut frames: Vec<Frame> = Vec::new();
    let mut rest = data.as_slice();
    while !rest.is_empty() {
        let (frame, tail) = parse(rest).map_err(|err| {
            frame_error(
                &format!("decode failed at byte {}", data.len() - rest.len()),
                err,
            )
        })?;
        frames.push(frame);
        rest = tail;
    }

    print_frames(&frames, format);
    Ok(SUCCESS)
}

fn decode_hex(hex: &str) -> CliResult<Vec<u8>> {
    let cleaned: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.len() % 2 != 0 {
        return Err(CliError::new(USAGE, "hex input has an odd number of digits"));
    }
    (0..cleaned.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&cleaned[i..i + 2], 16)
                .map_err(|_| CliError::new(USAGE, format!("invalid hex at offset {i}")))
        })
        .collect()
}
