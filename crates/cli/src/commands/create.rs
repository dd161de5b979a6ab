use tidemark::create_migration_file;

use super::Context;

pub fn run(context: &Context, name: &str) -> anyhow::Result<()> {
    let path = create_migration_file(&context.dir, name)?;
    println!("Created migration: {}", path.display());
    Ok(())
}
