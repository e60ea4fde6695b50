use color_eyre::Result;

use clonal_service::Operation;

/// Print the operation catalogue
pub fn execute() -> Result<()> {
    let catalogue = Operation::catalogue();
    println!("{}", serde_json::to_string_pretty(&catalogue)?);
    Ok(())
}
