//! Show up as the active source and print what the TV remote sends us.

use cec_usb::{
    find_adapters, CecAdapter, CecUserControlCode, CEC_DEFAULT_OPEN_TIMEOUT,
};
use std::time::{Duration, Instant};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let port = match std::env::args().nth(1) {
        Some(port) => port,
        None => {
            let adapters = find_adapters(None)?;
            adapters.first().ok_or("no CEC adapter found")?.comm.clone()
        }
    };

    let mut cec = CecAdapter::new("remote keys");
    cec.open(&port, CEC_DEFAULT_OPEN_TIMEOUT)?;
    cec.set_active_view()?;
    println!("listening for 30s, press keys on the TV remote");

    let end = Instant::now() + Duration::from_secs(30);
    while Instant::now() < end {
        while let Some(key) = cec.poll_keypress() {
            match CecUserControlCode::try_from(key.keycode) {
                Ok(code) => println!("{code:?} ({}ms)", key.duration),
                Err(_) => println!("key {:#04x} ({}ms)", key.keycode, key.duration),
            }
        }
        while let Some(command) = cec.poll_command() {
            println!(
                "{:?} -> {:?}: opcode {:#04x} {:x?}",
                command.source, command.destination, command.opcode, command.parameters
            );
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    cec.close();
    Ok(())
}
