use std::time::Duration;

use ipmi_lan::{BridgeHop, BridgePath, Client};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Example (Get Device ID from IPMB address 0x72 on channel 7):
    //   cargo run --example bridged_raw -- 192.168.1.10:623 admin password 0x72 7 0x06 0x01
    let mut args = std::env::args().skip(1);
    let target = args.next().ok_or("missing <host:port>")?.parse()?;
    let username = args.next().ok_or("missing <username>")?;
    let password = args.next().ok_or("missing <password>")?;
    let addr = parse_u8(&args.next().ok_or("missing <ipmb-addr>")?)?;
    let channel = parse_u8(&args.next().ok_or("missing <channel>")?)?;
    let netfn = parse_u8(&args.next().ok_or("missing <netfn>")?)?;
    let cmd = parse_u8(&args.next().ok_or("missing <cmd>")?)?;
    let data = args.map(|b| parse_u8(&b)).collect::<Result<Vec<_>, _>>()?;

    let client = Client::builder(target)
        .username(username)
        .password(password)
        .timeout(Duration::from_secs(2))
        .bridge(BridgePath::OneHop(BridgeHop::new(addr, channel)))
        .build()?;

    let response = client.send_raw(netfn, cmd, &data)?;
    println!("{response:?}");

    client.close()?;
    Ok(())
}

fn parse_u8(s: &str) -> Result<u8, Box<dyn std::error::Error>> {
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16)?,
        None => s.parse()?,
    };
    Ok(value)
}
