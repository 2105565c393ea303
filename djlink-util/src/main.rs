use anyhow::Result;

use djlink::{Config, DjLink};

fn usage() -> ! {
    eprintln!("usage: djlink-util [--json] [--name NAME] [--device-number N] [--interface IFACE]");
    std::process::exit(1);
}

fn parse_args() -> (Config, bool) {
    let mut config = Config {
        name: "djlink-util".to_string(),
        ..Config::default()
    };
    let mut json = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--json" => json = true,
            "--name" => match args.next() {
                Some(name) => config.name = name,
                None => usage(),
            },
            "--device-number" => match args.next().and_then(|n| n.parse().ok()) {
                Some(n) => config.device_number = n,
                None => usage(),
            },
            "--interface" => match args.next() {
                Some(name) => config.interface_name = Some(name),
                None => usage(),
            },
            _ => usage(),
        }
    }

    (config, json)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let (config, json) = parse_args();
    let mut link = DjLink::join(config).await?;
    println!("joined as device {}", link.device_number());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                break;
            }
            res = link.next() => {
                match res {
                    Ok(msg) if json => println!("{}", serde_json::to_string(&msg)?),
                    Ok(msg) => println!("msg: {:?}", msg),
                    Err(e) => {
                        eprintln!("error: {}", e);
                        break;
                    }
                }
            }
        }
    }
    println!("terminating");
    link.terminate().await;

    Ok(())
}
