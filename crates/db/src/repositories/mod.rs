//! Zero-sized repository structs, one per table family.
//!
//! Methods that take `&PgPool` run standalone; methods that take
//! `&mut PgConnection` are meant to be called inside a transaction.

pub mod claim_repo;
pub mod employee_repo;
pub mod sample_repo;
pub mod screenshot_repo;
pub mod settings_repo;
pub mod work_session_repo;

pub use claim_repo::ClaimRepo;
pub use employee_repo::EmployeeRepo;
pub use sample_repo::SampleRepo;
pub use screenshot_repo::ScreenshotRepo;
pub use settings_repo::SettingsRepo;
pub use work_session_repo::WorkSessionRepo;
