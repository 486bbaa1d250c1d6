//! Wake the TV, claim the screen for ten seconds, then send the whole
//! bus to standby.

use cec_usb::{find_adapters, CecAdapter, CecLogicalAddress, CEC_DEFAULT_OPEN_TIMEOUT};
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let port = match std::env::args().nth(1) {
        Some(port) => port,
        None => {
            let adapters = find_adapters(None)?;
            let adapter = adapters.first().ok_or("no CEC adapter found")?;
            println!("using adapter {} on {}", adapter.path, adapter.comm);
            adapter.comm.clone()
        }
    };

    let mut cec = CecAdapter::new("power cycle");
    cec.open(&port, CEC_DEFAULT_OPEN_TIMEOUT)?;

    cec.power_on_devices(CecLogicalAddress::Tv)?;
    cec.set_active_view()?;
    std::thread::sleep(Duration::from_secs(10));
    cec.standby_devices(CecLogicalAddress::Broadcast)?;

    while let Some(log) = cec.poll_log_message() {
        println!("{:?}: {}", log.level, log.message);
    }
    cec.close();
    Ok(())
}
