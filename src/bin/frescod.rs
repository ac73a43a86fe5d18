// Author: Dustin Pilgrim
// License: MIT

use anyhow::Result;

fn main() -> Result<()> {
    fresco::daemon::run_daemon()
}
