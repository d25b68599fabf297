use std::io::{self, Read, Write};
use std::net::{IpAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use super::session::{DownloadSession, ReceiveStep};
use crate::Error;
use crate::net::bind_stream_for;
use crate::task::TaskContext;

const RECV_BUFFER_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub(crate) struct TransferParams {
    pub timeout: Duration,
    pub connect_delay: Duration,
    pub multihome: Option<IpAddr>,
}

enum LoopStep {
    Received,
    Idle,
    Stop,
}

/// Runs one HTTP exchange for the session behind `ctx`.
pub(crate) fn run_transfer(mut ctx: TaskContext<DownloadSession>, params: TransferParams) {
    let Some(Some((remote, request))) = ctx.setup(DownloadSession::begin_transfer) else {
        return;
    };

    let socket = match bind_stream_for(remote, params.multihome) {
        Ok(socket) => socket,
        Err(e) => {
            ctx.setup(|s| {
                s.fail(Error::connect(format!("bind() failed: {}", e)));
                s.end_transfer();
            });
            return;
        }
    };
    ctx.detach();

    thread::sleep(params.connect_delay);
    if !ctx.is_live() {
        return;
    }

    if let Err(e) = socket.connect_timeout(&remote.into(), params.timeout) {
        let error = if e.kind() == io::ErrorKind::TimedOut {
            Error::connect_timeout()
        } else {
            Error::connect(format!("connect() to {} failed: {}", remote, e))
        };
        ctx.with_live(|s| {
            s.fail(error);
            s.end_transfer();
        });
        return;
    }
    let stream: TcpStream = socket.into();

    if let Err(e) = send_request(&stream, &request, params.timeout) {
        ctx.with_live(|s| {
            s.fail(Error::Send(e.to_string()));
            s.end_transfer();
        });
        return;
    }
    log::debug!("Sent request to {}", remote);
    if ctx.with_live(DownloadSession::mark_receiving).is_none() {
        return;
    }

    receive_loop(&ctx, &stream, params.timeout);
    ctx.with_live(DownloadSession::end_transfer);
}

fn send_request(stream: &TcpStream, request: &str, timeout: Duration) -> io::Result<()> {
    stream.set_write_timeout(Some(timeout))?;
    let mut writer = stream;
    writer.write_all(request.as_bytes())?;
    stream.set_nonblocking(true)
}

fn receive_loop(ctx: &TaskContext<DownloadSession>, stream: &TcpStream, timeout: Duration) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let mut last_received = Instant::now();

    loop {
        let step = ctx.with_live(|session| {
            let mut reader = stream;
            match reader.read(&mut buf) {
                Ok(0) => {
                    log::debug!("Server closed the connection");
                    session.process_incoming(&[], true);
                    LoopStep::Stop
                }
                Ok(n) => match session.process_incoming(&buf[..n], false) {
                    ReceiveStep::Continue => LoopStep::Received,
                    ReceiveStep::Restart | ReceiveStep::Done => LoopStep::Stop,
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => LoopStep::Idle,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => LoopStep::Idle,
                Err(e) => {
                    session.fail(Error::Socket(e.to_string()));
                    LoopStep::Stop
                }
            }
        });

        match step {
            None | Some(LoopStep::Stop) => return,
            Some(LoopStep::Received) => last_received = Instant::now(),
            Some(LoopStep::Idle) => {
                if last_received.elapsed() > timeout {
                    ctx.with_live(|s| s.fail(Error::ReceiveTimeout));
                    return;
                }
            }
        }
        thread::yield_now();
    }
}
