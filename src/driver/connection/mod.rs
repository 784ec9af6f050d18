pub mod error;

use super::{
    crypto::Secret,
    receive::VideoRtpReceiver,
    sender::{OpusRtpSender, VideoRtpSender},
    tasks::{
        message::*,
        udp_rx,
        udp_tx,
        ws as ws_task,
    },
    SessionContext,
    SessionKind,
};
use crate::{
    audio::LoopbackPipeline,
    constants::*,
    events::ConnectionState,
    info::ConnectionInfo,
    model::{
        id::{GuildId as WireGuild, UserId as WireUser},
        payload::*,
        Event as GatewayEvent,
    },
    video::{CapturePipeline, H264Decoder, H264Encoder, KeyframeRequest},
    ws::WsStream,
};
use discortp::discord::{IpDiscoveryPacket, IpDiscoveryType, MutableIpDiscoveryPacket};
use error::{Error, Result};
use flume::Sender;
use std::{net::IpAddr, str::FromStr, sync::Arc};
use tokio::{net::UdpSocket, spawn, time::timeout};
use tracing::{debug, info, warn};
use url::Url;

/// An established session: its tasks' channels and media pipelines.
pub(crate) struct Connection {
    pub(crate) info: ConnectionInfo,
    pub(crate) ssrc: u32,
    pub(crate) ws: Sender<WsMessage>,
    pub(crate) udp_tx: Sender<UdpTxMessage>,
    pub(crate) udp_rx: Sender<UdpRxMessage>,
    pub(crate) video_pipeline: Option<CapturePipeline>,
    pub(crate) loopback: Option<LoopbackPipeline>,
    pub(crate) keyframe: Option<KeyframeRequest>,
    /// Held so key zeroization is tied to connection teardown.
    _secret: Secret,
}

impl Connection {
    pub(crate) async fn new(
        info: ConnectionInfo,
        ctx: &SessionContext,
        interconnect: &Interconnect,
    ) -> Result<Connection> {
        if let Some(t) = ctx.config.connect_timeout {
            timeout(t, Connection::new_inner(info, ctx, interconnect)).await?
        } else {
            Connection::new_inner(info, ctx, interconnect).await
        }
    }

    async fn new_inner(
        mut info: ConnectionInfo,
        ctx: &SessionContext,
        interconnect: &Interconnect,
    ) -> Result<Connection> {
        ctx.shared.set_state(ConnectionState::Connecting);

        let url = generate_url(&mut info.endpoint)?;
        let mut client = WsStream::connect(&*ctx.config.ws_connector, url).await?;

        // Socket is open: now waiting on the handshake proper.
        ctx.shared.set_state(ConnectionState::Establishing);

        let hello = wait_for_hello(&mut client).await?;

        client
            .send_json(&GatewayEvent::from(Identify {
                server_id: WireGuild::from(info.guild_id),
                user_id: WireUser::from(info.user_id),
                session_id: info.session_id.clone(),
                token: info.token.clone(),
                video: info.video,
            }))
            .await?;

        let ready = wait_for_ready(&mut client).await?;
        let ssrc = ready.ssrc;

        if !ready.modes.iter().any(|m| m == CRYPTO_MODE) {
            // Continue anyway; the server may still accept our selection.
            warn!("{CRYPTO_MODE} not advertised by server (modes: {:?}).", ready.modes);
        }

        let udp = UdpSocket::bind("0.0.0.0:0").await?;
        udp.connect((ready.ip.as_str(), ready.port)).await?;
        let server_addr = udp.peer_addr()?;

        let (public_addr, public_port) = ip_discovery(&udp, ssrc).await?;
        info!("IP discovery: {public_addr}:{public_port}");

        client
            .send_json(&GatewayEvent::from(SelectProtocol {
                protocol: "udp".into(),
                data: ProtocolData {
                    address: public_addr,
                    port: public_port,
                    mode: CRYPTO_MODE.into(),
                },
            }))
            .await?;

        let secret = wait_for_session_description(&mut client).await?;
        let cipher = secret.cipher();

        info!("Connected to: {}", info.endpoint);
        info!("WS heartbeat duration {}ms.", hello.heartbeat_interval);

        let (ws_msg_tx, ws_msg_rx) = flume::unbounded();
        let (udp_msg_tx, udp_msg_rx) = flume::unbounded();
        let (udp_rx_tx, udp_rx_rx) = flume::unbounded();

        let udp = Arc::new(udp);

        // The audio sender's counters begin life here: the NAT-punching
        // silence frame is its first packet (sequence 1, nonce 1).
        let mut audio_sender = OpusRtpSender::new(ssrc, cipher.clone(), udp_msg_tx.clone());

        if !matches!(ctx.kind, SessionKind::StreamSender) {
            client
                .send_json(&GatewayEvent::from(Speaking {
                    speaking: SpeakingState::MICROPHONE,
                    delay: Some(0),
                    ssrc,
                    user_id: None,
                }))
                .await?;
        }

        audio_sender.send_silence();

        spawn(udp_tx::runner(udp_msg_rx, udp.clone()));

        let video_receiver = build_video_receiver(ctx, ssrc);

        spawn(udp_rx::runner(
            interconnect.clone(),
            udp_rx_rx,
            cipher,
            udp.clone(),
            server_addr,
            match ctx.kind {
                SessionKind::Voice => ctx.engine.clone(),
                _ => None,
            },
            video_receiver,
        ));

        let aux = ws_task::AuxNetwork::new(
            ws_msg_rx,
            client,
            hello.heartbeat_interval,
            ctx.shared.clone(),
            ctx.engine.clone(),
        );
        spawn(ws_task::runner(interconnect.clone(), aux));

        let mut connection = Connection {
            info,
            ssrc,
            ws: ws_msg_tx,
            udp_tx: udp_msg_tx,
            udp_rx: udp_rx_tx,
            video_pipeline: None,
            loopback: None,
            keyframe: None,
            _secret: secret,
        };

        match ctx.kind {
            SessionKind::Voice => {
                if let Some(engine) = &ctx.engine {
                    engine.reset_clock();
                    engine.set_bitrate(ctx.config.voice_bitrate);
                    engine.set_opus_sink(Some(Box::new(move |opus, ts| {
                        audio_sender.send_opus(opus, ts);
                    })));

                    // One dead direction does not end the session.
                    if let Err(e) = engine.start_playback() {
                        warn!("Playback unavailable: {e}");
                    }
                    if let Err(e) = engine.start_capture() {
                        warn!("Capture unavailable: {e}");
                    }
                }

                ctx.shared.set_state(ConnectionState::Connected);
            },
            SessionKind::StreamSender => {
                ctx.shared.set_state(ConnectionState::Connected);
                connection.start_stream_pipelines(ctx, interconnect, audio_sender);
            },
            SessionKind::StreamViewer => {
                ctx.shared.set_state(ConnectionState::Connected);

                // Announce ourselves as a receive-only video party.
                drop(connection.ws.send(WsMessage::Send(GatewayEvent::from(Video {
                    audio_ssrc: ssrc,
                    video_ssrc: 0,
                    rtx_ssrc: 0,
                    streams: Vec::new(),
                    codecs: Vec::new(),
                }))));
            },
        }

        Ok(connection)
    }

    /// Stream-sender extras, run once `Connected` is observable: the video
    /// declaration, the soundshare Speaking, and both outgoing pipelines.
    fn start_stream_pipelines(
        &mut self,
        ctx: &SessionContext,
        interconnect: &Interconnect,
        audio_sender: OpusRtpSender,
    ) {
        let ssrc = self.ssrc;
        let video_ssrc = ssrc + 1;
        let rtx_ssrc = ssrc + 2;
        let video_cfg = ctx.config.video;

        drop(self.ws.send(WsMessage::Send(GatewayEvent::from(Video {
            audio_ssrc: ssrc,
            video_ssrc,
            rtx_ssrc,
            streams: vec![VideoStream {
                kind: "video".into(),
                rid: "100".into(),
                ssrc: video_ssrc,
                active: true,
                quality: 100,
                max_bitrate: video_cfg.bitrate,
                max_framerate: video_cfg.fps,
                max_resolution: Resolution {
                    kind: "fixed".into(),
                    width: video_cfg.width,
                    height: video_cfg.height,
                },
            }],
            codecs: vec![VideoCodec {
                name: "H264".into(),
                kind: "video".into(),
                priority: 1000,
                payload_type: VIDEO_PAYLOAD_TYPE,
                rtx_payload_type: Some(VIDEO_RTX_PAYLOAD_TYPE),
            }],
        }))));

        drop(self.ws.send(WsMessage::Send(GatewayEvent::from(Speaking {
            speaking: SpeakingState::SOUNDSHARE,
            delay: Some(0),
            ssrc,
            user_id: None,
        }))));

        if let Some(media) = &ctx.media {
            let source = media
                .open_video_source(&ctx.config.video_source)
                .map_err(|e| {
                    warn!("Screen capture init failed: {e}");
                    e
                })
                .ok();

            if let Some(source) = source {
                match media
                    .create_encoder(&video_cfg)
                    .and_then(|b| H264Encoder::new(b, video_cfg))
                {
                    Ok(encoder) => {
                        self.keyframe = Some(encoder.keyframe_request());

                        let cipher = self._secret.cipher();
                        let mut video_sender =
                            VideoRtpSender::new(video_ssrc, cipher, self.udp_tx.clone());

                        let end_core = interconnect.core.clone();
                        self.video_pipeline = Some(CapturePipeline::start(
                            source,
                            encoder,
                            Box::new(move |annex_b, ts| {
                                video_sender.send_access_unit(annex_b, ts);
                            }),
                            video_cfg.fps,
                            Box::new(move || {
                                info!("Capture window closed; ending stream session.");
                                drop(end_core.send(CoreMessage::Disconnect));
                            }),
                        ));
                    },
                    Err(e) => warn!("H264 encoder init failed: {e}"),
                }
            }
        }

        // System audio for the stream; failure means a video-only share.
        if let Some(backend) = &ctx.audio_backend {
            match LoopbackPipeline::start(&**backend, ctx.config.loopback_bitrate, audio_sender) {
                Ok(loopback) => self.loopback = Some(loopback),
                Err(e) => warn!("Loopback audio capture init failed (non-fatal): {e}"),
            }
        }
    }

    /// Signals every task to exit and stops the media pipelines. Idempotent;
    /// safe to call on an already-dead connection.
    pub(crate) fn shutdown(&mut self) {
        if let Some(pipeline) = self.video_pipeline.as_mut() {
            pipeline.stop();
        }
        self.video_pipeline = None;

        if let Some(loopback) = self.loopback.as_mut() {
            loopback.stop();
        }
        self.loopback = None;

        drop(self.ws.send(WsMessage::Poison));
        drop(self.udp_tx.send(UdpTxMessage::Poison));
        drop(self.udp_rx.send(UdpRxMessage::Poison));
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
        info!("Disconnected from {}.", self.info.endpoint);
    }
}

fn generate_url(endpoint: &mut String) -> Result<Url> {
    if let Some(stripped) = endpoint.strip_suffix(":80") {
        let stripped = stripped.to_owned();
        *endpoint = stripped;
    }

    Url::parse(&format!("wss://{endpoint}/?v={VOICE_GATEWAY_VERSION}")).or(Err(Error::EndpointUrl))
}

async fn wait_for_hello(client: &mut WsStream) -> Result<Hello> {
    loop {
        let Some(value) = client.recv_json().await? else {
            continue;
        };

        match value {
            GatewayEvent::Hello(h) => return Ok(h),
            other => {
                debug!("Expected hello; got: {:?}", other);
            },
        }
    }
}

async fn wait_for_ready(client: &mut WsStream) -> Result<Ready> {
    loop {
        let Some(value) = client.recv_json().await? else {
            continue;
        };

        match value {
            GatewayEvent::Ready(r) => return Ok(r),
            other => {
                debug!("Expected ready; got: {:?}", other);
            },
        }
    }
}

async fn wait_for_session_description(client: &mut WsStream) -> Result<Secret> {
    loop {
        let Some(value) = client.recv_json().await? else {
            continue;
        };

        match value {
            GatewayEvent::SessionDescription(desc) => {
                if desc.mode != CRYPTO_MODE {
                    return Err(Error::CryptoModeInvalid);
                }

                return Secret::try_from_slice(&desc.secret_key).ok_or(Error::KeyInvalidLength);
            },
            other => {
                debug!(
                    "Expected session description; got: op{}/{:?}",
                    other.kind() as u8,
                    other
                );
            },
        }
    }
}

/// Discord's STUN-like exchange: a 74-byte request, answered with our
/// public address. Non-matching datagrams count toward the retry budget.
async fn ip_discovery(udp: &UdpSocket, ssrc: u32) -> Result<(IpAddr, u16)> {
    let mut bytes = [0; IpDiscoveryPacket::const_packet_size()];
    {
        let mut view = MutableIpDiscoveryPacket::new(&mut bytes[..])
            .expect("const packet size is sufficient for an IPDiscovery packet");
        view.set_pkt_type(IpDiscoveryType::Request);
        view.set_length(70);
        view.set_ssrc(ssrc);
    }

    udp.send(&bytes).await?;

    let mut buf = [0u8; VOICE_PACKET_MAX];
    for attempt in 1..=IP_DISCOVERY_TRIES {
        let (len, _addr) = udp.recv_from(&mut buf).await?;

        let Some(view) = IpDiscoveryPacket::new(&buf[..len]) else {
            debug!("Undersized discovery candidate (try {attempt}/{IP_DISCOVERY_TRIES}).");
            continue;
        };

        if view.get_pkt_type() != IpDiscoveryType::Response {
            debug!("Non-discovery packet received (try {attempt}/{IP_DISCOVERY_TRIES}).");
            continue;
        }

        // UDP spoofing precludes assuming a clean '\0' left edge; take the
        // first NUL as the terminator.
        let nul_byte_index = view
            .get_address_raw()
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::IllegalIp)?;

        let address_str = std::str::from_utf8(&view.get_address_raw()[..nul_byte_index])
            .map_err(|_| Error::IllegalIp)?;

        let address = IpAddr::from_str(address_str).map_err(|_| Error::IllegalIp)?;

        return Ok((address, view.get_port()));
    }

    Err(Error::IllegalDiscoveryResponse)
}

fn build_video_receiver(ctx: &SessionContext, ssrc: u32) -> Option<VideoRtpReceiver> {
    if !matches!(ctx.kind, SessionKind::StreamViewer) {
        return None;
    }

    let media = ctx.media.as_ref()?;
    let backend = match media.create_decoder() {
        Ok(b) => b,
        Err(e) => {
            warn!("H264 decoder init failed: {e}");
            return None;
        },
    };

    let video_cfg = ctx.config.video;
    let mut decoder = H264Decoder::new(backend, video_cfg.width, video_cfg.height);
    let shared = ctx.shared.clone();

    Some(VideoRtpReceiver::new(
        ssrc + 1,
        Box::new(move |annex_b, _ts| match decoder.decode(annex_b) {
            Ok(Some(frame)) => shared.hooks.dispatch_video_frame(frame),
            Ok(None) => {},
            Err(e) => debug!("Video decode failed: {e}"),
        }),
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::Config,
        driver::{crypto, SessionShared},
        events::{ConnectionState, SessionHooks},
        id::{ChannelId, GuildId, UserId},
        ws::{Result as WsResult, WsConnector, WsTransport},
    };
    use futures::future::BoxFuture;
    use std::{
        net::SocketAddr,
        sync::Mutex,
        time::Duration,
    };
    use tokio::time::sleep;

    const TEST_KEY: [u8; 32] = [0x01; 32];
    const TEST_SSRC: u32 = 0xABCD_0000;

    /// Scripted gateway: answers Identify with Ready and SelectProtocol
    /// with SessionDescription, recording everything the client sends.
    #[derive(Clone)]
    struct ScriptedGateway {
        sent: Arc<Mutex<Vec<serde_json::Value>>>,
        udp_addr: SocketAddr,
        inbound_tx: flume::Sender<String>,
        inbound_rx: flume::Receiver<String>,
    }

    impl ScriptedGateway {
        fn new(udp_addr: SocketAddr) -> Self {
            let (inbound_tx, inbound_rx) = flume::unbounded();
            Self {
                sent: Arc::new(Mutex::new(Vec::new())),
                udp_addr,
                inbound_tx,
                inbound_rx,
            }
        }

        fn sent_ops(&self) -> Vec<u64> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|v| v["op"].as_u64().unwrap())
                .collect()
        }

        fn sent_with_op(&self, op: u64) -> Vec<serde_json::Value> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|v| v["op"] == op)
                .cloned()
                .collect()
        }
    }

    struct ScriptedTransport(ScriptedGateway);

    impl WsTransport for ScriptedTransport {
        fn send_text(&mut self, text: String) -> BoxFuture<'_, WsResult<()>> {
            Box::pin(async move {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                let op = value["op"].as_u64().unwrap();
                self.0.sent.lock().unwrap().push(value);

                match op {
                    0 => {
                        let ready = serde_json::json!({
                            "op": 2,
                            "d": {
                                "ssrc": TEST_SSRC,
                                "ip": self.0.udp_addr.ip().to_string(),
                                "port": self.0.udp_addr.port(),
                                "modes": ["aead_xchacha20_poly1305_rtpsize"],
                            }
                        });
                        drop(self.0.inbound_tx.send(ready.to_string()));
                    },
                    1 => {
                        let desc = serde_json::json!({
                            "op": 4,
                            "d": {
                                "mode": "aead_xchacha20_poly1305_rtpsize",
                                "secret_key": TEST_KEY.to_vec(),
                            }
                        });
                        drop(self.0.inbound_tx.send(desc.to_string()));
                    },
                    _ => {},
                }

                Ok(())
            })
        }

        fn recv_text(&mut self) -> BoxFuture<'_, WsResult<Option<String>>> {
            Box::pin(async move {
                match self.0.inbound_rx.recv_async().await {
                    Ok(text) => Ok(Some(text)),
                    Err(_) => Err(crate::ws::Error::WsClosed(None)),
                }
            })
        }

        fn close(&mut self, _code: u16) -> BoxFuture<'_, WsResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    struct ScriptedConnector(ScriptedGateway);

    impl WsConnector for ScriptedConnector {
        fn connect(&self, _url: Url) -> BoxFuture<'static, WsResult<Box<dyn WsTransport>>> {
            let gateway = self.0.clone();
            // Hello greets the fresh socket.
            let hello = serde_json::json!({"op": 8, "d": {"heartbeat_interval": 40000.0}});
            drop(gateway.inbound_tx.send(hello.to_string()));
            Box::pin(async move { Ok(Box::new(ScriptedTransport(gateway)) as Box<dyn WsTransport>) })
        }
    }

    /// A loopback "voice server": answers IP discovery, collects every
    /// other datagram.
    async fn spawn_udp_server() -> (SocketAddr, Arc<Mutex<Vec<Vec<u8>>>>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let packets = Arc::new(Mutex::new(Vec::new()));

        let sink = packets.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            while let Ok((len, from)) = socket.recv_from(&mut buf).await {
                let datagram = &buf[..len];
                if len == 74 && datagram[0] == 0x00 && datagram[1] == 0x01 {
                    let mut response = [0u8; 74];
                    response[1] = 0x02;
                    response[3] = 70;
                    response[4..8].copy_from_slice(&datagram[4..8]);
                    response[8..17].copy_from_slice(b"127.0.0.1");
                    response[72..74].copy_from_slice(&50_000u16.to_be_bytes());
                    drop(socket.send_to(&response, from).await);
                } else {
                    sink.lock().unwrap().push(datagram.to_vec());
                }
            }
        });

        (addr, packets)
    }

    fn test_info(video: bool) -> ConnectionInfo {
        ConnectionInfo {
            channel_id: Some(ChannelId(7)),
            endpoint: "voice.example".into(),
            guild_id: GuildId(10),
            session_id: if video { "guild:10:7:5".into() } else { "S".into() },
            token: "t1".into(),
            user_id: UserId(5),
            video,
        }
    }

    fn test_ctx(
        gateway: &ScriptedGateway,
        kind: SessionKind,
        states: Arc<Mutex<Vec<ConnectionState>>>,
    ) -> SessionContext {
        let hooks = SessionHooks::default().on_state_change(move |s| {
            states.lock().unwrap().push(s);
        });

        SessionContext {
            config: Config::default().ws_connector(Arc::new(ScriptedConnector(gateway.clone()))),
            kind,
            engine: None,
            audio_backend: None,
            media: None,
            shared: Arc::new(SessionShared::new(hooks)),
        }
    }

    fn interconnect() -> (Interconnect, flume::Receiver<CoreMessage>) {
        let (tx, rx) = flume::unbounded();
        (Interconnect { core: tx }, rx)
    }

    async fn wait_for_packets(
        packets: &Arc<Mutex<Vec<Vec<u8>>>>,
        count: usize,
    ) -> Vec<Vec<u8>> {
        for _ in 0..100 {
            {
                let held = packets.lock().unwrap();
                if held.len() >= count {
                    return held.clone();
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
        packets.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn voice_join_happy_path() {
        let (udp_addr, packets) = spawn_udp_server().await;
        let gateway = ScriptedGateway::new(udp_addr);
        let states = Arc::new(Mutex::new(Vec::new()));
        let ctx = test_ctx(&gateway, SessionKind::Voice, states.clone());
        let (ic, _core_rx) = interconnect();

        let conn = Connection::new(test_info(false), &ctx, &ic).await.unwrap();
        assert_eq!(conn.ssrc, TEST_SSRC);

        // Hello -> Identify -> Ready -> SelectProtocol -> SessionDescription,
        // then the initial Speaking. Connected is observed only at the end.
        assert_eq!(gateway.sent_ops(), vec![0, 1, 5]);
        assert_eq!(
            states.lock().unwrap().clone(),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Establishing,
                ConnectionState::Connected,
            ],
        );

        let identify = &gateway.sent_with_op(0)[0];
        assert_eq!(identify["d"]["server_id"], "10");
        assert_eq!(identify["d"]["user_id"], "5");
        assert_eq!(identify["d"]["session_id"], "S");
        assert_eq!(identify["d"]["video"], false);

        let select = &gateway.sent_with_op(1)[0];
        assert_eq!(select["d"]["protocol"], "udp");
        assert_eq!(select["d"]["data"]["mode"], "aead_xchacha20_poly1305_rtpsize");
        assert_eq!(select["d"]["data"]["address"], "127.0.0.1");
        assert_eq!(select["d"]["data"]["port"], 50_000);

        let speaking = &gateway.sent_with_op(5)[0];
        assert_eq!(speaking["d"]["speaking"], 1);

        // The NAT-punching silence frame: nonce counter 1, sequence 1.
        let sent = wait_for_packets(&packets, 1).await;
        assert_eq!(sent.len(), 1);

        let cipher = crypto::Secret::try_from_slice(&TEST_KEY).unwrap().cipher();
        let mut packet = sent[0].clone();
        let (meta, plaintext) = crypto::open_in_place(&cipher, &mut packet).unwrap();
        assert_eq!(plaintext, &SILENT_FRAME);
        assert_eq!(meta.nonce_counter, 1);
        assert_eq!(meta.sequence, 1);
        assert_eq!(meta.ssrc, TEST_SSRC);
    }

    #[tokio::test]
    async fn reconnect_restarts_counters() {
        let (udp_addr, packets) = spawn_udp_server().await;

        for round in 0..2 {
            let gateway = ScriptedGateway::new(udp_addr);
            let states = Arc::new(Mutex::new(Vec::new()));
            let ctx = test_ctx(&gateway, SessionKind::Voice, states);
            let (ic, _core_rx) = interconnect();

            let conn = Connection::new(test_info(false), &ctx, &ic).await.unwrap();
            drop(conn);

            let sent = wait_for_packets(&packets, round + 1).await;
            let cipher = crypto::Secret::try_from_slice(&TEST_KEY).unwrap().cipher();
            let mut packet = sent[round].clone();
            let (meta, _) = crypto::open_in_place(&cipher, &mut packet).unwrap();
            assert_eq!(meta.nonce_counter, 1, "fresh session, fresh counters");
            assert_eq!(meta.sequence, 1);
        }
    }

    #[tokio::test]
    async fn stream_sender_announces_video_and_soundshare() {
        let (udp_addr, _packets) = spawn_udp_server().await;
        let gateway = ScriptedGateway::new(udp_addr);
        let states = Arc::new(Mutex::new(Vec::new()));
        let ctx = test_ctx(&gateway, SessionKind::StreamSender, states);
        let (ic, _core_rx) = interconnect();

        let _conn = Connection::new(test_info(true), &ctx, &ic).await.unwrap();

        // Opcode 12 and the soundshare Speaking flow through the ws task;
        // give it a moment to drain.
        for _ in 0..100 {
            if !gateway.sent_with_op(12).is_empty() && !gateway.sent_with_op(5).is_empty() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }

        let videos = gateway.sent_with_op(12);
        assert_eq!(videos.len(), 1);
        let d = &videos[0]["d"];
        assert_eq!(d["audio_ssrc"], TEST_SSRC);
        assert_eq!(d["video_ssrc"], TEST_SSRC + 1);
        assert_eq!(d["rtx_ssrc"], TEST_SSRC + 2);
        assert_eq!(d["streams"][0]["ssrc"], TEST_SSRC + 1);
        assert_eq!(d["streams"][0]["rid"], "100");
        assert_eq!(d["streams"][0]["active"], true);
        assert_eq!(d["codecs"][0]["name"], "H264");
        assert_eq!(d["codecs"][0]["payload_type"], 101);
        assert_eq!(d["codecs"][0]["rtx_payload_type"], 102);

        let speakings = gateway.sent_with_op(5);
        assert_eq!(speakings.len(), 1, "exactly one Speaking for a sender");
        assert_eq!(speakings[0]["d"]["speaking"], 2);
    }

    #[tokio::test]
    async fn wrong_key_length_fails_the_handshake() {
        let (udp_addr, _packets) = spawn_udp_server().await;
        let gateway = ScriptedGateway::new(udp_addr);

        // Patch the scripted SessionDescription to a 31-byte key.
        struct ShortKeyTransport(ScriptedTransport);

        impl WsTransport for ShortKeyTransport {
            fn send_text(&mut self, text: String) -> BoxFuture<'_, WsResult<()>> {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                if value["op"] == 1 {
                    let desc = serde_json::json!({
                        "op": 4,
                        "d": {
                            "mode": "aead_xchacha20_poly1305_rtpsize",
                            "secret_key": vec![1u8; 31],
                        }
                    });
                    drop(self.0 .0.inbound_tx.send(desc.to_string()));
                    self.0 .0.sent.lock().unwrap().push(value);
                    return Box::pin(async { Ok(()) });
                }
                self.0.send_text(text)
            }

            fn recv_text(&mut self) -> BoxFuture<'_, WsResult<Option<String>>> {
                self.0.recv_text()
            }

            fn close(&mut self, code: u16) -> BoxFuture<'_, WsResult<()>> {
                self.0.close(code)
            }
        }

        struct ShortKeyConnector(ScriptedGateway);

        impl WsConnector for ShortKeyConnector {
            fn connect(&self, _url: Url) -> BoxFuture<'static, WsResult<Box<dyn WsTransport>>> {
                let gateway = self.0.clone();
                let hello = serde_json::json!({"op": 8, "d": {"heartbeat_interval": 40000.0}});
                drop(gateway.inbound_tx.send(hello.to_string()));
                Box::pin(async move {
                    Ok(Box::new(ShortKeyTransport(ScriptedTransport(gateway)))
                        as Box<dyn WsTransport>)
                })
            }
        }

        let states = Arc::new(Mutex::new(Vec::new()));
        let hooks = {
            let states = states.clone();
            SessionHooks::default().on_state_change(move |s| states.lock().unwrap().push(s))
        };

        let ctx = SessionContext {
            config: Config::default().ws_connector(Arc::new(ShortKeyConnector(gateway))),
            kind: SessionKind::Voice,
            engine: None,
            audio_backend: None,
            media: None,
            shared: Arc::new(SessionShared::new(hooks)),
        };
        let (ic, _core_rx) = interconnect();

        let result = Connection::new(test_info(false), &ctx, &ic).await;
        assert!(matches!(result, Err(Error::KeyInvalidLength)));
    }
}
