use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::Result;

use ticknet::{CloseReason, Connection, ConnectionId, DriverConfig, NetworkNotify, UdpDriver};

#[derive(Debug)]
enum ListenEvent {
    Accepted { id: ConnectionId, addr: SocketAddr },
    Received { id: ConnectionId, payload: Vec<u8> },
    Closed { addr: SocketAddr, reason: CloseReason },
}

#[derive(Default)]
struct EventQueue {
    events: Vec<ListenEvent>,
}

impl NetworkNotify for EventQueue {
    fn accepted(&mut self, connection: &Connection) {
        self.events.push(ListenEvent::Accepted {
            id: connection.id,
            addr: connection.addr,
        });
    }

    fn received(&mut self, connection: &Connection, payload: &[u8]) {
        self.events.push(ListenEvent::Received {
            id: connection.id,
            payload: payload.to_vec(),
        });
    }

    fn closed(&mut self, connection: &Connection, reason: CloseReason) {
        self.events.push(ListenEvent::Closed {
            addr: connection.addr,
            reason,
        });
    }
}

pub fn run(config: DriverConfig, port: u16, duration: Option<Duration>) -> Result<()> {
    let mut driver = UdpDriver::listen(config, port)?;
    let mut queue = EventQueue::default();
    let started = Instant::now();

    while duration.is_none_or(|d| started.elapsed() < d) {
        driver.tick_dispatch(&mut queue);

        for event in queue.events.drain(..) {
            match event {
                ListenEvent::Accepted { id, addr } => {
                    log::info!("Connection {} from {}", id, addr);
                    driver.mark_established(id);
                }
                ListenEvent::Received { id, payload } => {
                    if let Err(e) = driver.send(id, &payload) {
                        log::warn!("Echo to {} failed: {}", id, e);
                    }
                }
                ListenEvent::Closed { addr, reason } => {
                    log::info!("Connection to {} closed ({:?})", addr, reason);
                }
            }
        }

        std::thread::sleep(Duration::from_millis(1));
    }

    let stats = driver.stats();
    log::info!(
        "Shutting down: {} packets in, {} packets out, {} dropped",
        stats.packets_received,
        stats.packets_sent,
        stats.dropped
    );
    Ok(())
}
