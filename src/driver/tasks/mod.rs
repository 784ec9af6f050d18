#![allow(missing_docs)]

pub(crate) mod message;
pub(crate) mod udp_rx;
pub(crate) mod udp_tx;
pub(crate) mod ws;

use super::{connection::Connection, SessionContext};
use crate::{events::ConnectionState, video::KeyframeRequest};
use flume::{Receiver, Sender};
use message::*;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tracing::{error, instrument, trace};

pub(crate) fn start(
    handle: &Handle,
    ctx: SessionContext,
    keyframe: Arc<Mutex<Option<KeyframeRequest>>>,
    rx: Receiver<CoreMessage>,
    tx: Sender<CoreMessage>,
) {
    handle.spawn(async move {
        trace!("Session runner started.");
        runner(ctx, keyframe, rx, tx).await;
        trace!("Session runner finished.");
    });
}

#[instrument(skip_all)]
async fn runner(
    ctx: SessionContext,
    keyframe: Arc<Mutex<Option<KeyframeRequest>>>,
    rx: Receiver<CoreMessage>,
    tx: Sender<CoreMessage>,
) {
    let interconnect = Interconnect { core: tx };
    let mut connection: Option<Connection> = None;

    while let Ok(msg) = rx.recv_async().await {
        match msg {
            CoreMessage::ConnectWithResult(info, result_tx) => {
                // A new attempt replaces any live session.
                full_teardown(&ctx, &keyframe, &mut connection);

                connection = match Connection::new(info, &ctx, &interconnect).await {
                    Ok(conn) => {
                        *keyframe.lock().unwrap() = conn.keyframe.clone();
                        // Other side may not be listening: this is fine.
                        drop(result_tx.send(Ok(())));
                        Some(conn)
                    },
                    Err(why) => {
                        error!("Failed to connect: {why}");
                        full_teardown(&ctx, &keyframe, &mut connection);
                        drop(result_tx.send(Err(why)));
                        None
                    },
                };
            },
            CoreMessage::Disconnect
            | CoreMessage::SignalWsClosure
            | CoreMessage::SignalUdpClosure => {
                full_teardown(&ctx, &keyframe, &mut connection);
            },
            CoreMessage::RequestKeyframe => {
                if let Some(handle) = keyframe.lock().unwrap().as_ref() {
                    handle.request();
                }
            },
            CoreMessage::Poison => break,
        }
    }

    full_teardown(&ctx, &keyframe, &mut connection);
    trace!("Session runner exited.");
}

/// Idempotent teardown: stop media, poison the network tasks, wipe the key
/// (with the dropped connection), clear per-SSRC state, and surface
/// `Disconnected`.
fn full_teardown(
    ctx: &SessionContext,
    keyframe: &Arc<Mutex<Option<KeyframeRequest>>>,
    connection: &mut Option<Connection>,
) {
    if let Some(mut conn) = connection.take() {
        conn.shutdown();
    }

    *keyframe.lock().unwrap() = None;

    if let Some(engine) = &ctx.engine {
        engine.set_opus_sink(None);
        engine.stop_capture();
        engine.stop_playback();
        engine.remove_all_ssrcs();
    }

    ctx.shared.clear_mappings();
    ctx.shared.set_state(ConnectionState::Disconnected);
}
