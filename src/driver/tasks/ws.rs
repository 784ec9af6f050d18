//! The gateway task: heartbeat cadence plus event processing after the
//! handshake completes.

use super::message::*;
use crate::{
    audio::AudioEngine,
    constants::CLOSE_CODE_DISCONNECT,
    driver::SessionShared,
    events::SpeakingEvent,
    id::UserId,
    model::{payload::Heartbeat, Event as GatewayEvent},
    ws::WsStream,
};
use flume::Receiver;
use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::{
    select,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, instrument, trace, warn};

pub(crate) struct AuxNetwork {
    rx: Receiver<WsMessage>,
    ws_client: WsStream,
    heartbeat_interval: Duration,
    last_heartbeat_nonce: Option<u64>,
    shared: Arc<SessionShared>,
    engine: Option<AudioEngine>,
}

impl AuxNetwork {
    pub(crate) fn new(
        evt_rx: Receiver<WsMessage>,
        ws_client: WsStream,
        heartbeat_interval: f64,
        shared: Arc<SessionShared>,
        engine: Option<AudioEngine>,
    ) -> Self {
        Self {
            rx: evt_rx,
            ws_client,
            heartbeat_interval: Duration::from_secs_f64(heartbeat_interval / 1000.0),
            last_heartbeat_nonce: None,
            shared,
            engine,
        }
    }

    async fn run(&mut self, interconnect: &Interconnect) {
        let mut next_heartbeat = Instant::now() + self.heartbeat_interval;

        loop {
            let mut ws_error = false;

            let hb = sleep_until(next_heartbeat);

            select! {
                () = hb => {
                    ws_error = self.send_heartbeat().await.is_err();
                    next_heartbeat = Instant::now() + self.heartbeat_interval;
                }
                ws_msg = self.ws_client.recv_json_no_timeout() => {
                    match ws_msg {
                        Err(e) => {
                            debug!("Error receiving gateway event: {e}.");
                            ws_error = true;
                        },
                        Ok(Some(msg)) => {
                            self.process_ws(msg);
                        },
                        Ok(None) => {},
                    }
                }
                inner_msg = self.rx.recv_async() => {
                    match inner_msg {
                        Ok(WsMessage::Send(evt)) => {
                            if let Err(e) = self.ws_client.send_json(&evt).await {
                                debug!("Error sending gateway event: {e}.");
                                ws_error = true;
                            }
                        },
                        Ok(WsMessage::Poison) => {
                            // Client-initiated disconnect.
                            if let Err(e) = self.ws_client.close(CLOSE_CODE_DISCONNECT).await {
                                debug!("Error closing gateway socket: {e}.");
                            }
                            break;
                        },
                        Err(_) => break,
                    }
                }
            }

            if ws_error {
                drop(interconnect.core.send(CoreMessage::SignalWsClosure));
                break;
            }
        }
    }

    async fn send_heartbeat(&mut self) -> crate::ws::Result<()> {
        // Millisecond epoch time doubles as the ack-matching nonce.
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        self.last_heartbeat_nonce = Some(nonce);

        trace!("Sending heartbeat.");

        self.ws_client
            .send_json(&GatewayEvent::from(Heartbeat { nonce }))
            .await
    }

    fn process_ws(&mut self, value: GatewayEvent) {
        match value {
            GatewayEvent::Speaking(ev) => {
                info!(
                    "Speaking update: user {:?} -> SSRC {} ({:?}).",
                    ev.user_id, ev.ssrc, ev.speaking
                );

                let user_id = ev.user_id.map(|u| UserId(u.0));

                if let Some(user) = user_id {
                    let staged = self.shared.map_user_ssrc(user, ev.ssrc);
                    if let (Some(volume), Some(engine)) = (staged, &self.engine) {
                        engine.set_ssrc_volume(ev.ssrc, volume);
                    }
                }

                if let Some(engine) = &self.engine {
                    engine.add_ssrc(ev.ssrc);
                }

                self.shared.hooks.dispatch_speaking(SpeakingEvent {
                    user_id,
                    ssrc: ev.ssrc,
                    flags: ev.speaking,
                });
            },
            GatewayEvent::ClientDisconnect(ev) => {
                debug!("Client disconnected: {}.", ev.user_id);

                if let Some(ssrc) = self.shared.unmap_user(UserId(ev.user_id.0)) {
                    if let Some(engine) = &self.engine {
                        engine.remove_ssrc(ssrc);
                    }
                }
            },
            GatewayEvent::HeartbeatAck(ev) => {
                if let Some(nonce) = self.last_heartbeat_nonce.take() {
                    if ev.nonce == nonce {
                        trace!("Heartbeat ACK received.");
                    } else {
                        warn!(
                            "Heartbeat nonce mismatch! Expected {}, saw {}.",
                            nonce, ev.nonce
                        );
                    }
                }
            },
            other => {
                trace!("Received other websocket data: {:?}", other);
            },
        }
    }
}

#[instrument(skip_all)]
pub(crate) async fn runner(interconnect: Interconnect, mut aux: AuxNetwork) {
    trace!("WS thread started.");
    aux.run(&interconnect).await;
    trace!("WS thread finished.");
}
