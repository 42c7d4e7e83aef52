use std::io::{self, BufRead, Write};
use std::time::Duration;

use ipmi_lan::{Client, SolControl};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Example (each stdin line is sent to the serial console):
    //   cargo run --example sol_console -- 192.168.1.10:623 admin password
    let mut args = std::env::args().skip(1);
    let target = args.next().ok_or("missing <host:port>")?.parse()?;
    let username = args.next().ok_or("missing <username>")?;
    let password = args.next().ok_or("missing <password>")?;

    let client = Client::builder(target)
        .username(username)
        .password(password)
        .timeout(Duration::from_millis(500))
        .keepalive(Duration::from_secs(30))
        .build()?;

    let stdout = io::stdout();
    for line in io::stdin().lock().lines() {
        let mut line = line?;
        line.push('\r');
        for chunk in line.as_bytes().chunks(usize::from(u8::MAX)) {
            if !client.sol_send(chunk, SolControl::empty())? {
                eprintln!("SOL data not acknowledged");
            }
        }

        let output = client.sol_receive()?;
        let mut out = stdout.lock();
        out.write_all(&output)?;
        out.flush()?;
        client.keepalive()?;
    }

    client.close()?;
    Ok(())
}
