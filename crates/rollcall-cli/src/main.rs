use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{enroll, OnnxFaceEngine};
use rollcall_hw::camera::{default_backends, CameraConfig};
use rollcall_store::{db, AttendanceLedger, EmbeddingCipher, NewEmployee, RosterStore};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance system CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new employee from a photo
    Register {
        /// Path to a photo containing exactly one face
        image: PathBuf,
        /// Full display name
        #[arg(short, long)]
        name: String,
        /// Unique employee code (e.g., "E042")
        #[arg(short, long)]
        code: String,
        /// Contact email for presence alerts
        #[arg(short, long)]
        email: Option<String>,
        #[arg(short, long, default_value = "General")]
        department: String,
    },
    /// List registered employees
    List,
    /// Remove an employee and their attendance history
    Remove {
        /// Employee id to remove
        id: i64,
    },
    /// Show recent attendance records
    Report {
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
    /// Probe each camera backend and report what answers
    TestCam,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Register { image, name, code, email, department } => {
            register(image, name, code, email, department)
        }
        Commands::List => list(),
        Commands::Remove { id } => remove(id),
        Commands::Report { limit } => report(limit),
        Commands::TestCam => test_cam(),
    }
}

fn register(
    image_path: PathBuf,
    name: String,
    code: String,
    email: Option<String>,
    department: String,
) -> Result<()> {
    let mut engine = OnnxFaceEngine::load(
        &model_path(&env_or("ROLLCALL_DETECTOR_MODEL", "face_det.onnx")),
        &model_path(&env_or("ROLLCALL_EMBEDDER_MODEL", "face_embed.onnx")),
        env_f32("ROLLCALL_CONFIDENCE_THRESHOLD", 0.5),
        env_f32("ROLLCALL_NMS_IOU_THRESHOLD", 0.4),
    )
    .context("failed to load face models")?;

    let photo = image::open(&image_path)
        .with_context(|| format!("failed to open image {}", image_path.display()))?
        .to_rgb8();
    let (width, height) = photo.dimensions();

    println!("Processing photo for {name}...");
    let embedding = enroll::embedding_from_image(&mut engine, photo.as_raw(), width, height)?;

    let tolerance = env_f32(
        "ROLLCALL_REGISTER_TOLERANCE",
        env_f32("ROLLCALL_MATCH_TOLERANCE", rollcall_core::DEFAULT_TOLERANCE),
    );
    let store = open_roster()?;
    let id = store.add_employee(
        &NewEmployee { name: name.clone(), code, email, department },
        &embedding,
        tolerance,
    )?;

    println!("Registered {name} (employee {id})");
    Ok(())
}

fn list() -> Result<()> {
    let store = open_roster()?;
    let employees = store.employees()?;

    if employees.is_empty() {
        println!("No employees registered");
        return Ok(());
    }

    println!(
        "{:<5} {:<24} {:<10} {:<28} {:<14} Registered",
        "ID", "Name", "Code", "Email", "Department"
    );
    for e in employees {
        println!(
            "{:<5} {:<24} {:<10} {:<28} {:<14} {}",
            e.id,
            e.name,
            e.code.as_deref().unwrap_or("-"),
            e.email.as_deref().unwrap_or("-"),
            e.department.as_deref().unwrap_or("-"),
            e.created_at,
        );
    }
    Ok(())
}

fn remove(id: i64) -> Result<()> {
    let mut store = open_roster()?;
    store.delete_employee(id)?;
    println!("Removed employee {id} and their attendance history");
    Ok(())
}

fn report(limit: u32) -> Result<()> {
    let ledger = AttendanceLedger::open(&db_path())?;
    let records = ledger.recent(limit)?;

    if records.is_empty() {
        println!("No attendance records yet");
        return Ok(());
    }

    println!("{:<24} {:<10} {:<12} {:<10} Status", "Name", "Code", "Date", "Time");
    for r in records {
        println!(
            "{:<24} {:<10} {:<12} {:<10} {}",
            r.name,
            r.code.as_deref().unwrap_or("-"),
            r.date.to_string(),
            r.time.to_string(),
            r.status,
        );
    }
    Ok(())
}

fn test_cam() -> Result<()> {
    let cfg = CameraConfig {
        device_path: env_or("ROLLCALL_CAMERA_DEVICE", "/dev/video0"),
        width: 640,
        height: 480,
    };

    println!("Probing camera backends (device {})...", cfg.device_path);
    let mut any_good = false;

    for backend in default_backends() {
        tracing::debug!(backend = backend.name(), "probing");
        match backend.open(&cfg) {
            Ok(mut source) => {
                match source.read() {
                    Ok(frame) if frame.is_decodable() => {
                        println!("  {:<8} OK — {}x{}", backend.name(), frame.width, frame.height);
                        any_good = true;
                    }
                    Ok(_) => println!("  {:<8} opened, but first frame was undecodable", backend.name()),
                    Err(e) => println!("  {:<8} opened, but first read failed: {e}", backend.name()),
                }
                source.release();
            }
            Err(e) => println!("  {:<8} unavailable: {e}", backend.name()),
        }
    }

    if !any_good {
        println!("No working camera found. Check the connection, or set ROLLCALL_CAMERA_DEVICE.");
    }
    Ok(())
}

fn open_roster() -> Result<RosterStore> {
    let cipher = EmbeddingCipher::load_or_create(&key_path())?;
    let conn = db::open(&db_path())?;
    Ok(RosterStore::new(conn, cipher))
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn db_path() -> PathBuf {
    std::env::var("ROLLCALL_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir().join("attendance.db"))
}

fn key_path() -> PathBuf {
    std::env::var("ROLLCALL_KEY_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir().join("embeddings.key"))
}

fn model_path(file: &str) -> String {
    std::env::var("ROLLCALL_MODEL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir().join("models"))
        .join(file)
        .to_string_lossy()
        .into_owned()
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
