use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::anyhow;
use bytes::Bytes;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use voicebridge::config::BridgeConfig;
use voicebridge::core::ai::AiSession;
use voicebridge::core::media::{
    MediaConfig, MediaConnectionState, MediaEvent, MediaSession, SyntheticAudioSource,
    SyntheticSignal,
};
use voicebridge::core::signaling::{SignalingClient, SignalingEvent};
use voicebridge::routes;
use voicebridge::session::{CallSession, LegState, SessionSupervisor};
use voicebridge::state::AppState;

/// voicebridge - telephony call to speech-AI session bridge
#[derive(Parser, Debug)]
#[command(name = "voicebridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Signaling channel ARN (overrides SIGNALING_CHANNEL_ARN)
    #[arg(long = "channel-arn")]
    channel_arn: Option<String>,

    /// Diagnostics HTTP port (overrides HTTP_PORT)
    #[arg(long = "http-port")]
    http_port: Option<u16>,

    /// Run against a synthetic audio source instead of a live call.
    /// Exercises the full AI pipeline without signaling or media setup.
    #[arg(long)]
    synthetic: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let mut config = BridgeConfig::from_env()?;
    if let Some(channel_arn) = cli.channel_arn {
        config.channel_arn = channel_arn;
    }
    if let Some(port) = cli.http_port {
        config.http_port = port;
    }

    let state = Arc::new(AppState::new(config.clone()));

    // Diagnostics HTTP surface.
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("diagnostics listening on {addr}");
    let router = routes::create_router(state.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("diagnostics server error: {e}");
        }
    });

    // Operator stop ends the call through the supervisor's cancel token.
    let shutdown = CancellationToken::new();
    let signal_cancel = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal_cancel.cancel();
        }
    });

    let result = if cli.synthetic {
        run_synthetic_call(&config, state, shutdown).await
    } else {
        run_call(&config, state, shutdown).await
    };

    if let Err(e) = &result {
        error!("call failed: {e}");
    }
    result
}

/// Bridge one live call: relay handshake, peer media setup, AI session,
/// then the supervisor until the call ends.
async fn run_call(
    config: &BridgeConfig,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let session = Arc::new(CallSession::new(
        &config.caller_id,
        &config.correlation_id(),
        &config.channel_arn,
    ));
    state.registry.insert(session.clone());
    info!(session_id = %session.session_id(), "starting call");

    let (signaling, mut sig_events) = SignalingClient::connect(
        &config.signaling_endpoint,
        &config.channel_arn,
        session.session_id(),
    )
    .await?;
    session.set_signaling(LegState::Connected);
    session.record_activity("signaling_connected", config.signaling_endpoint.clone());

    let (media, mut media_events, inbound_frames) = MediaSession::new(MediaConfig::default()).await?;
    let media = Arc::new(media);

    let offer = media.create_offer().await?;
    signaling.send_offer(offer).await?;
    session.record_activity("offer_sent", "");

    // Pump signaling and media events until the call ends: remote SDP and
    // ICE into the media session, local ICE back out, transport state into
    // the session record. Signaling loss ends the call.
    let pump_media = media.clone();
    let pump_session = session.clone();
    let call_cancel = CancellationToken::new();
    let pump_cancel = call_cancel.clone();
    tokio::spawn(async move {
        let mut signaling = signaling;
        loop {
            tokio::select! {
                _ = pump_cancel.cancelled() => break,
                event = sig_events.recv() => match event {
                    Some(SignalingEvent::Answer(sdp)) => {
                        if let Err(e) = pump_media.apply_remote_answer(sdp).await {
                            error!("failed to apply remote answer: {e}");
                            pump_cancel.cancel();
                        } else {
                            pump_session.record_activity("answer_received", "");
                        }
                    }
                    Some(SignalingEvent::Offer(_)) => {
                        warn!("unexpected remote offer after local offer, ignoring");
                    }
                    Some(SignalingEvent::IceCandidate(candidate)) => {
                        pump_media.add_remote_ice_candidate(candidate).await;
                    }
                    Some(SignalingEvent::ConnectAck) => {
                        pump_session.record_activity("signaling_ack", "");
                    }
                    Some(SignalingEvent::Error(message)) => {
                        warn!("signaling error: {message}");
                    }
                    Some(SignalingEvent::Closed) | None => {
                        info!("signaling channel closed");
                        pump_session.set_signaling(LegState::Disconnected);
                        pump_cancel.cancel();
                    }
                },
                event = media_events.recv() => match event {
                    Some(MediaEvent::LocalIceCandidate(candidate)) => {
                        if let Err(e) = signaling.send_ice_candidate(candidate).await {
                            warn!("failed to send local ICE candidate: {e}");
                        }
                    }
                    Some(MediaEvent::ConnectionState(conn_state)) => {
                        let leg = match conn_state {
                            MediaConnectionState::Connecting => LegState::Connecting,
                            MediaConnectionState::Connected => LegState::Connected,
                            MediaConnectionState::Disconnected => LegState::Disconnected,
                        };
                        pump_session.set_media(leg);
                        if conn_state == MediaConnectionState::Disconnected {
                            info!("media transport lost");
                            pump_cancel.cancel();
                        }
                    }
                    None => break,
                },
            }
        }
        signaling.close().await;
    });

    media.wait_connected().await?;
    session.record_activity("media_connected", "");

    let ai = AiSession::connect(&config.ai_endpoint).await?;

    // Outbound μ-law frames to the peer.
    let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(256);
    let out_media = media.clone();
    tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = out_media.send_audio_frame(frame).await {
                warn!("failed to send outbound frame: {e}");
                break;
            }
        }
    });

    let supervisor = SessionSupervisor::new(
        session.clone(),
        ai,
        inbound_frames,
        out_tx,
        config.supervisor_config(),
    );
    supervisor.mark_signaling_up();

    // Operator stop, signaling loss or media loss all end the call.
    let linked = supervisor.cancel_token();
    let operator_stop = shutdown.clone();
    let transport_lost = call_cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = operator_stop.cancelled() => {}
            _ = transport_lost.cancelled() => {}
        }
        linked.cancel();
    });

    let result = supervisor.run().await;

    // Media and signaling close after the AI teardown sequence.
    media.close().await;
    session.set_media(LegState::Disconnected);
    call_cancel.cancel();
    session.record_activity("call_ended", "");

    result?;
    Ok(())
}

/// Smoke mode: feed synthetic caller audio through the real AI pipeline and
/// discard outbound frames.
async fn run_synthetic_call(
    config: &BridgeConfig,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let session = Arc::new(CallSession::new(
        &config.caller_id,
        &config.correlation_id(),
        &config.channel_arn,
    ));
    state.registry.insert(session.clone());
    info!(session_id = %session.session_id(), "starting synthetic call");

    // 30 seconds of tone at the telephony frame cadence.
    let (_source, inbound_frames) = SyntheticAudioSource::start(
        SyntheticSignal::Tone {
            frequency_hz: 440.0,
            amplitude: 0.3,
        },
        1500,
    );

    let ai = AiSession::connect(&config.ai_endpoint).await?;

    let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(256);
    let drain_session = session.clone();
    tokio::spawn(async move {
        let mut frames = 0u64;
        while out_rx.recv().await.is_some() {
            frames += 1;
        }
        info!(session_id = %drain_session.session_id(), frames, "synthetic sink drained");
    });

    let supervisor = SessionSupervisor::new(
        session.clone(),
        ai,
        inbound_frames,
        out_tx,
        config.supervisor_config(),
    );
    let supervisor_cancel = supervisor.cancel_token();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        supervisor_cancel.cancel();
    });

    supervisor.run().await?;
    Ok(())
}
