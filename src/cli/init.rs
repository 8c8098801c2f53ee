use crate::db::{get_connection, init_db};
use crate::settings::{get_data_dir, load_settings, save_settings, shellexpand_path};

pub fn run(data_dir: Option<String>) -> anyhow::Result<()> {
    let mut settings = load_settings();
    if let Some(dir) = data_dir {
        settings.data_dir = shellexpand_path(&dir);
    }
    save_settings(&settings)?;

    let resolved = get_data_dir();
    std::fs::create_dir_all(&resolved)?;
    std::fs::create_dir_all(resolved.join("statements"))?;

    let conn = get_connection(&resolved.join("tally.db"))?;
    init_db(&conn)?;

    println!("Initialized tally at {}", resolved.display());
    Ok(())
}
