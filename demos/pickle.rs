// Copyright (c) 2024-2026 the unpickle developers.  Licensed under the
// Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according
// to those terms.

//! A simple example executable that decodes pickle streams.

use std::env;
use std::error::Error;
use std::fs::File;
use std::io::{stdin, Read};
use std::process::exit;

use serde_json as json;

use unpickle::{values_from_slice, DeOptions};

fn main() -> Result<(), Box<dyn Error>> {
    let args = env::args().collect::<Vec<_>>();
    if args.len() < 2 {
        println!("Usage: pickle (decode | to_json) [filename]");
        println!();
        println!("Input is either given file or stdin.");
        println!("decode:    decode and display pickle");
        println!("to_json:   decode and jsonify pickle");
        exit(1);
    }

    let mut reader: Box<dyn Read> = if args.len() == 3 {
        Box::new(File::open(&args[2])?)
    } else {
        Box::new(stdin())
    };
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;

    match &*args[1] {
        "decode" => {
            let decoded = values_from_slice(&data, DeOptions::new())?;
            println!("{:#?}", decoded);
        }
        "to_json" => {
            for value in values_from_slice(&data, DeOptions::new())? {
                println!("{}", json::to_string_pretty(&value)?);
            }
        }
        _ => {
            println!("No such subcommand.");
            exit(1);
        }
    }
    Ok(())
}
