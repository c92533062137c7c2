//! The length-prefixed-TCP transport: a 4-byte little-endian `i32` length prefix followed by a
//! UTF-8 JSON payload, in both directions, with a final 1-byte ack read by the server before it
//! disconnects. Concurrent grading tasks are out of scope for one host, so this is a
//! single-task-at-a-time accept loop: one connection is fully drained before the next is
//! accepted.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use log::{error, info, warn};

use judge::grader::Grader;
use judge::model::Event;

use crate::protocol::WireTask;
use crate::{Error, ErrorKind, Result};

const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes)?;
    let len = i32::from_le_bytes(len_bytes);
    if len < 0 || len as usize > MAX_FRAME_LEN {
        return Err(Error::from(ErrorKind::FrameTooLarge(len)));
    }

    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload)?;
    Ok(payload)
}

fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> Result<()> {
    let len = payload.len() as i32;
    stream.write_all(&len.to_le_bytes())?;
    stream.write_all(payload)?;
    Ok(())
}

fn write_event(stream: &mut TcpStream, event: &Event) -> Result<()> {
    let payload = serde_json::to_vec(event)?;
    write_frame(stream, &payload)
}

/// Handle exactly one grading connection: read one framed task, drive the Grader, stream the
/// resulting events back framed identically, send the sentinel, then read the caller's ack.
fn handle_connection(mut stream: TcpStream, grader: &Grader) -> Result<()> {
    let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "?".to_owned());
    info!("accepted grading connection from {}", peer);

    let payload = read_frame(&mut stream)?;
    let task_json = String::from_utf8(payload)
        .map_err(|e| Error::from(ErrorKind::MalformedTask(e.to_string())))?;

    let task = match WireTask::from_json(&task_json) {
        Ok(wire_task) => wire_task.into_task(),
        Err(e) => {
            warn!("rejecting malformed task from {}: {}", peer, e);
            write_event(&mut stream, &Event::Final {
                status: judge::model::Verdict::SystemError.code(),
                score: 0,
                statistics: Default::default(),
                log: format!("malformed task: {}", e),
                detail: Vec::new(),
            })?;
            return finish(stream);
        }
    };

    let mut io_err: Option<Error> = None;
    grader.grade(&task, &mut |event| {
        if io_err.is_some() {
            return;
        }
        if let Err(e) = write_event(&mut stream, &event) {
            error!("failed to stream event to {}: {}", peer, e);
            io_err = Some(e);
        }
    });
    if let Some(e) = io_err {
        return Err(e);
    }

    finish(stream)
}

/// Send the stream terminator and wait for the caller's 1-byte ack before returning (and
/// dropping the connection).
fn finish(mut stream: TcpStream) -> Result<()> {
    write_frame(&mut stream, b"null")?;

    let mut ack = [0u8; 1];
    let _ = stream.read_exact(&mut ack);
    Ok(())
}

/// Run the accept loop forever: one grading task at a time, per-connection. A failure handling
/// one connection is logged and does not bring down the server.
pub fn serve(listener: TcpListener, grader: Arc<Grader>) -> Result<()> {
    for incoming in listener.incoming() {
        let stream = match incoming {
            Ok(stream) => stream,
            Err(e) => {
                error!("failed to accept connection: {}", e);
                continue;
            }
        };

        if let Err(e) = handle_connection(stream, &grader) {
            error!("grading connection failed: {}", e);
        }
    }

    Ok(())
}
