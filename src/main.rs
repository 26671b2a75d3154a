use anyhow::{bail, Context};
use chrono::Utc;
use mentorcall::application::call::{
    CallDependencies, CallHooks, CallLauncher, CallSessionController, CallSettings,
    IncomingCallNotifier, LogToaster, StartOutcome, Toaster,
};
use mentorcall::config::Settings;
use mentorcall::domain::call_session::{Booking, CallSessionRepository, ParticipantProfile};
use mentorcall::domain::shared::value_objects::{BookingId, UserId};
use mentorcall::infrastructure::media::HeadlessDevices;
use mentorcall::infrastructure::persistence::InMemoryCallSessionRepository;
use mentorcall::infrastructure::realtime::ws_client::WsRealtimeClient;
use mentorcall::infrastructure::realtime::{InMemoryRealtime, RealtimeClient};
use mentorcall::infrastructure::webrtc::peer_factory;
use mentorcall::interface::api::{build_router, init_metrics, AppState};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "postgres")]
use mentorcall::infrastructure::persistence::{create_pool, run_migrations, PgCallSessionRepository};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;
    init_tracing(&settings);

    let mode = std::env::args().nth(1).unwrap_or_else(|| "serve".to_string());
    match mode.as_str() {
        "serve" => serve(settings).await,
        "demo" => demo(settings).await,
        other => bail!("Unknown mode '{}', expected 'serve' or 'demo'", other),
    }
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn open_repository(settings: &Settings) -> anyhow::Result<Arc<dyn CallSessionRepository>> {
    if let Some(repository) = open_database(settings).await? {
        return Ok(repository);
    }
    info!("Using in-memory call session store");
    Ok(Arc::new(InMemoryCallSessionRepository::new()))
}

#[cfg(feature = "postgres")]
async fn open_database(
    settings: &Settings,
) -> anyhow::Result<Option<Arc<dyn CallSessionRepository>>> {
    let Some(url) = settings.database.url.as_deref() else {
        return Ok(None);
    };

    info!("Initializing database connection...");
    let pool = create_pool(url, &settings.database)
        .await
        .context("Failed to create database pool")?;

    info!("Running database migrations...");
    run_migrations(&pool).await.context("Failed to run migrations")?;

    let repository = PgCallSessionRepository::connect(pool)
        .await
        .context("Failed to start call session change feed")?;
    info!("Using PostgreSQL call session store");
    Ok(Some(Arc::new(repository)))
}

#[cfg(not(feature = "postgres"))]
async fn open_database(
    settings: &Settings,
) -> anyhow::Result<Option<Arc<dyn CallSessionRepository>>> {
    if settings.database.url.is_some() {
        warn!("database.url is set but the postgres feature is disabled");
    }
    Ok(None)
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    info!("Starting MentorCall API server");

    let prometheus_handle = init_metrics().context("Failed to install metrics recorder")?;
    let repository = open_repository(&settings).await?;
    let state = AppState::new(repository, InMemoryRealtime::new());
    let app = build_router(state, prometheus_handle);

    let address = settings.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!("API server listening on http://{}", address);
    info!("Realtime hub available at ws://{}/realtime", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    info!("MentorCall API server stopped");
    Ok(())
}

/// Runs a mentor and a mentee through one call in this process
async fn demo(settings: Settings) -> anyhow::Result<()> {
    info!("Starting MentorCall demo");

    let store = Arc::new(InMemoryCallSessionRepository::new());
    let mentor = UserId::new();
    let mentee = UserId::new();
    let booking_id = BookingId::new();
    store
        .insert_participant(ParticipantProfile::new(mentor, "Grace Hopper").with_title("Staff Engineer"))
        .await;
    store
        .insert_participant(ParticipantProfile::new(mentee, "Alan Turing"))
        .await;
    store.insert_booking(Booking::new(booking_id, mentor, mentee)).await;
    let repository: Arc<dyn CallSessionRepository> = store;

    let realtime: Arc<dyn RealtimeClient> = match settings.realtime.url.as_deref() {
        Some(url) => {
            info!("Connecting to realtime hub at {}", url);
            Arc::new(WsRealtimeClient::connect(url).await?)
        }
        None => Arc::new(InMemoryRealtime::new()),
    };
    let toaster: Arc<dyn Toaster> = Arc::new(LogToaster);

    let notifier = IncomingCallNotifier::start(repository.clone(), mentee, toaster.clone());

    let launcher = CallLauncher::new(repository.clone());
    let joined = launcher.join_booking_call(&booking_id, &mentor).await?;
    info!(session_id = %joined.session_id, is_initiator = joined.is_initiator, "Mentor joined booking call");

    let deps = CallDependencies {
        repository: repository.clone(),
        realtime,
        peers: peer_factory(settings.call.peer_backend),
        devices: Arc::new(HeadlessDevices),
        toaster,
    };
    let call_settings = CallSettings::from_settings(&settings);

    let mut mentor_call =
        CallSessionController::open(joined.session_id, mentor, deps.clone(), call_settings.clone())
            .await?;
    let mut mentee_call =
        CallSessionController::open(joined.session_id, mentee, deps, call_settings).await?;

    mentee_call.set_hooks(CallHooks {
        on_remote_stream: Some(Arc::new(|stream| {
            info!(stream_id = %stream.id(), tracks = stream.tracks().len(), "Mentee received remote stream");
        })),
        on_connection_state_change: Some(Arc::new(|state| {
            info!(state = %state, "Mentee connection state changed");
        })),
    });

    let mut ringing = notifier.watch();
    if tokio::time::timeout(Duration::from_secs(2), ringing.wait_for(Option::is_some))
        .await
        .is_ok()
    {
        if let Some(incoming) = notifier.incoming() {
            info!(caller = %incoming.caller_name, "Mentee picks up the incoming call");
        }
        notifier.dismiss();
    }

    for (name, call) in [("mentor", &mut mentor_call), ("mentee", &mut mentee_call)] {
        if call.start_call().await != StartOutcome::Started {
            bail!(
                "The {} could not start the call: {}",
                name,
                call.snapshot().error.unwrap_or_default()
            );
        }
    }

    let mut mentor_state = mentor_call.watch();
    tokio::time::timeout(CONNECT_TIMEOUT, mentor_state.wait_for(|s| s.is_connected))
        .await
        .context("Timed out waiting for the call to connect")??;
    info!("Call connected");

    if let Some(chat) = mentor_call.chat() {
        chat.send("Welcome! Shall we start with your questions?")?;
    }
    if let Some(chat) = mentee_call.chat() {
        match tokio::time::timeout(Duration::from_secs(2), chat.next_message()).await {
            Ok(Some(message)) => info!(from = %message.sender_name, "Chat: {}", message.message),
            _ => warn!("No chat message arrived"),
        }
    }

    tokio::time::sleep(Duration::from_secs(2)).await;
    info!("Call timer: {}", mentor_call.snapshot().elapsed_label(Utc::now()));

    mentee_call.end_call().await;
    mentor_call.end_call().await;
    notifier.stop();

    if let Some(session) = repository.get_call_session(&joined.session_id).await? {
        info!(
            status = %session.status(),
            duration_seconds = ?session.duration_seconds(),
            "Final call session"
        );
    }
    if let Some(booking) = repository.get_booking(&booking_id).await? {
        info!(status = ?booking.status, "Final booking");
    }

    info!("MentorCall demo finished");
    Ok(())
}
