//! Port listing and baud rate detection

use tokio_util::sync::CancellationToken;

use fittest_core::config::FitTestConfig;
use fittest_core::link::{list_ports, LinkNegotiator, TokioSerialTransport};

pub fn list() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found");
        return;
    }
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{}  [{:04x}:{:04x}] {}",
                port.name,
                vid,
                pid,
                port.product.as_deref().unwrap_or("")
            ),
            _ => println!("{}", port.name),
        }
    }
}

pub async fn detect(config: &FitTestConfig, port: &str, rates: &[u32]) -> anyhow::Result<()> {
    let negotiator = LinkNegotiator::new(config.link.clone());
    tracing::info!(port, "detecting instrument baud rate");
    let mut transport = TokioSerialTransport::new(port);

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let detected = if rates.is_empty() {
        negotiator.detect_baud_rate(&mut transport, &cancel).await
    } else {
        negotiator
            .detect_with_rates(&mut transport, rates, &cancel)
            .await
    };
    ctrl_c.abort();

    match detected? {
        Some(rate) => println!("{}: {} baud", port, rate),
        None => anyhow::bail!("no readable instrument output on {}", port),
    }
    Ok(())
}
