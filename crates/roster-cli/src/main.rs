use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "io.roster.Attendance1",
    default_service = "io.roster.Attendance1",
    default_path = "/io/roster/Attendance1"
)]
trait Roster {
    async fn enroll_face(&self, student_id: i64, image: &[u8]) -> zbus::Result<String>;
    async fn recognize(&self, image: &[u8]) -> zbus::Result<String>;
    async fn check_in(&self, course_id: i64, image: &[u8], date: &str) -> zbus::Result<String>;
    async fn record_attendance(
        &self,
        course_id: i64,
        student_id: i64,
        date: &str,
        status: &str,
    ) -> zbus::Result<String>;
    async fn attendance_summary(&self, course_id: i64, date: &str) -> zbus::Result<String>;
    async fn add_student(&self, roll_code: &str, first_name: &str, last_name: &str) -> zbus::Result<i64>;
    async fn add_course(&self, course_code: &str, course_name: &str) -> zbus::Result<i64>;
    async fn list_students(&self) -> zbus::Result<String>;
    async fn list_courses(&self) -> zbus::Result<String>;
    async fn get_course(&self, course_id: i64) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "roster", about = "Roster classroom attendance CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a face image for a student
    Enroll {
        /// Student id
        student_id: i64,
        /// Image file (PNG, JPEG, ...)
        image: PathBuf,
    },
    /// Identify the student in an image
    Recognize {
        image: PathBuf,
        /// Mark the recognized student present in this course
        #[arg(long)]
        course: Option<i64>,
        /// Date for --course (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<String>,
    },
    /// Record a student's attendance
    Record {
        course_id: i64,
        student_id: i64,
        /// present, absent, late or excused
        #[arg(long, default_value = "present")]
        status: String,
        /// YYYY-MM-DD, default today
        #[arg(long)]
        date: Option<String>,
    },
    /// Show every student's status for a course and date
    Summary {
        course_id: i64,
        /// YYYY-MM-DD, default today
        #[arg(long)]
        date: Option<String>,
    },
    /// Add a student
    AddStudent {
        roll_code: String,
        first_name: String,
        last_name: String,
    },
    /// Add a course
    AddCourse {
        course_code: String,
        course_name: String,
    },
    /// List students
    Students,
    /// List courses
    Courses,
    /// Show one course
    Course { course_id: i64 },
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    tracing::debug!(system = cli.system, "connecting to rosterd");

    let conn = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connecting to D-Bus")?;
    let proxy = RosterProxy::new(&conn).await?;

    match cli.command {
        Commands::Enroll { student_id, image } => {
            let bytes = read_image(&image)?;
            print_json(&proxy.enroll_face(student_id, &bytes).await?)?;
        }
        Commands::Recognize { image, course, date } => {
            let bytes = read_image(&image)?;
            let reply = match course {
                Some(course_id) => {
                    proxy
                        .check_in(course_id, &bytes, date.as_deref().unwrap_or(""))
                        .await?
                }
                None => proxy.recognize(&bytes).await?,
            };
            print_json(&reply)?;
        }
        Commands::Record {
            course_id,
            student_id,
            status,
            date,
        } => {
            let reply = proxy
                .record_attendance(course_id, student_id, date.as_deref().unwrap_or(""), &status)
                .await?;
            print_json(&reply)?;
        }
        Commands::Summary { course_id, date } => {
            let reply = proxy
                .attendance_summary(course_id, date.as_deref().unwrap_or(""))
                .await?;
            print_summary(&reply)?;
        }
        Commands::AddStudent {
            roll_code,
            first_name,
            last_name,
        } => {
            let id = proxy.add_student(&roll_code, &first_name, &last_name).await?;
            println!("{id}");
        }
        Commands::AddCourse {
            course_code,
            course_name,
        } => {
            let id = proxy.add_course(&course_code, &course_name).await?;
            println!("{id}");
        }
        Commands::Students => print_json(&proxy.list_students().await?)?,
        Commands::Courses => print_json(&proxy.list_courses().await?)?,
        Commands::Course { course_id } => print_json(&proxy.get_course(course_id).await?)?,
        Commands::Status => print_json(&proxy.status().await?)?,
    }

    Ok(())
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn print_json(reply: &str) -> Result<()> {
    let value: Value = serde_json::from_str(reply).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_summary(reply: &str) -> Result<()> {
    let rows: Vec<Value> = serde_json::from_str(reply).context("daemon returned invalid JSON")?;
    for row in rows {
        let field = |key: &str| row[key].as_str().unwrap_or("").to_string();
        println!(
            "{:<12} {:<30} {}",
            field("roll_code"),
            format!("{} {}", field("first_name"), field("last_name")),
            row["status"].as_str().unwrap_or("-"),
        );
    }
    Ok(())
}
