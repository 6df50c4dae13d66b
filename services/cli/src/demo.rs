use chrono::{Local, NaiveDate};
use clap::Args;
use roomhub::api::{ApiError, BookingRequest, Credentials, HttpRentalApi, MediaFile};
use roomhub::availability::{DateRange, ProbeState};
use roomhub::config::AppConfig;
use roomhub::error::AppError;
use roomhub::query::QueryState;
use roomhub::sandbox::{sandbox_router, SandboxBackend};
use roomhub::upload::{PipelineStatus, UploadRequest};
use roomhub::{telemetry, RentalClient};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Rental API base URL. Defaults to an in-process sandbox on a free port.
    #[arg(long)]
    pub(crate) api_base: Option<String>,
    /// Room to probe and book. Defaults to the first listed room.
    #[arg(long)]
    pub(crate) room: Option<String>,
    /// Check-in date (YYYY-MM-DD). Defaults to 30 days from today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) check_in: Option<NaiveDate>,
    /// Check-out date (YYYY-MM-DD). Defaults to check_in + 2 days.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) check_out: Option<NaiveDate>,
    /// Account used for the booking and upload steps.
    #[arg(long, default_value = "host")]
    pub(crate) username: String,
    #[arg(long, default_value = "host-pass")]
    pub(crate) password: String,
    /// Image to upload. A tiny placeholder is used when omitted.
    #[arg(long)]
    pub(crate) photo: Option<PathBuf>,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        api_base,
        room,
        check_in,
        check_out,
        username,
        password,
        photo,
    } = args;

    let mut config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    config.api.base_url = match api_base {
        Some(base) => base,
        None => spawn_sandbox().await?,
    };
    let api = HttpRentalApi::new(&config.api)?;
    let client = RentalClient::new(Arc::new(api), &config.cache);
    let mut events = client.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("  [{}] {} -> {:?}", event.id, event.kind.label(), event.status);
        }
    });

    println!("Rental client demo against {}", config.api.base_url);

    let rooms = ready(client.rooms().await)?;
    println!("\nListed {} rooms", rooms.len());
    for summary in rooms.iter() {
        println!(
            "- #{} {} ({}, {}) {} per night",
            summary.pk, summary.name, summary.city, summary.country, summary.price
        );
    }
    let Some(room_pk) = room.or_else(|| rooms.first().map(|summary| summary.pk.clone())) else {
        println!("Nothing to book.");
        return Ok(());
    };

    let check_in =
        check_in.unwrap_or_else(|| Local::now().date_naive() + chrono::Duration::days(30));
    let check_out = check_out.unwrap_or(check_in + chrono::Duration::days(2));

    println!("\nAvailability for room #{room_pk}");
    let partial = client
        .check_availability(&room_pk, DateRange::starting(check_in))
        .await;
    println!("- {check_in} .. ?: {}", describe_probe(&partial.state));
    let probe = client
        .check_availability(&room_pk, DateRange::new(check_in, check_out))
        .await;
    println!("- {check_in} .. {check_out}: {}", describe_probe(&probe.state));

    println!("\nLogging in as {username}");
    let login = client.log_in(Credentials { username, password }).await;
    login.into_result()?;
    let me = ready(client.current_user().await)?;
    println!("- session user: {} ({})", me.name, me.username);

    if probe.state.available() == Some(true) {
        println!("\nBooking {check_in} .. {check_out}");
        let booking = client
            .book(BookingRequest {
                room_pk: room_pk.clone(),
                check_in,
                check_out,
                guests: 2,
            })
            .await;
        match booking.into_result() {
            Ok(booking) => println!("- booking {} confirmed", booking.pk),
            Err(err) => println!("- booking rejected: {err}"),
        }
        let recheck = client
            .check_availability(&room_pk, DateRange::new(check_in, check_out))
            .await;
        println!("- rechecked: {}", describe_probe(&recheck.state));
    }

    println!("\nUploading a photo to room #{room_pk}");
    let file = load_photo(photo)?;
    let run = client
        .upload_photo(UploadRequest {
            file,
            description: "Demo upload".to_string(),
            room_pk: room_pk.clone(),
        })
        .await;
    let last_seen = client.upload_status().borrow().clone();
    match &run.status {
        PipelineStatus::Done => {
            let stored = run
                .photo
                .as_ref()
                .map(|photo| photo.file.as_str())
                .unwrap_or("?");
            println!("- published as {stored}");
        }
        PipelineStatus::Aborted { stage, error } => {
            println!("- stopped at {stage}: {error}");
        }
        other => println!("- unexpected status {other:?}"),
    }
    println!("- pipeline reports {last_seen:?}");

    let detail = ready(client.room(&room_pk).await)?;
    println!("- room #{} now has {} photo(s)", detail.pk, detail.photos.len());
    Ok(())
}

async fn spawn_sandbox() -> Result<String, AppError> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let backend = Arc::new(SandboxBackend::seeded(format!("http://{addr}")));
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, sandbox_router(backend)).await {
            eprintln!("sandbox stopped: {err}");
        }
    });
    Ok(format!("http://{addr}/api/v1/"))
}

fn ready<T>(state: QueryState<T>) -> Result<Arc<T>, AppError> {
    match state.into_result() {
        Some(result) => result.map_err(AppError::from),
        None => Err(AppError::Api(ApiError::Transport(
            "read disabled for this key".to_string(),
        ))),
    }
}

fn describe_probe(state: &ProbeState) -> String {
    match state {
        ProbeState::Idle => "pick both dates".to_string(),
        ProbeState::Ready { available: true } => "available".to_string(),
        ProbeState::Ready { available: false } => "already booked".to_string(),
        ProbeState::Error(err) => format!("check failed: {err}"),
        ProbeState::Superseded => "superseded".to_string(),
    }
}

fn load_photo(path: Option<PathBuf>) -> Result<MediaFile, AppError> {
    let Some(path) = path else {
        return Ok(MediaFile::new(
            "demo.png",
            mime_guess::mime::IMAGE_PNG,
            vec![0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'],
        ));
    };
    let bytes = std::fs::read(&path)?;
    let content_type = mime_guess::from_path(&path).first_or_octet_stream();
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.bin".to_string());
    Ok(MediaFile::new(name, content_type, bytes))
}
