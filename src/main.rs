use anyhow::Result;

fn main() -> Result<()> {
    let matches = invpoll::cli::parse_args();
    invpoll::boot::init_common(matches.get_one::<String>("log-file").map(String::as_str));

    if let Err(err) = invpoll::cli::actions::run(&matches) {
        log::error!("{err:#}");
        return Err(err);
    }
    Ok(())
}
