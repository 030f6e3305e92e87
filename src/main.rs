use clap::ErrorKind::{DisplayHelp, DisplayVersion};
use log::{info, trace};
use qncorr::{
    get_durations, QnCorrContext,
    QnCorrError::{ClapError, DryRun},
};
use std::{env, ffi::OsString, fmt::Debug, time::Duration};

fn main_with_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
    I: Debug,
{
    let qncorr_ctx = match QnCorrContext::from_args(args) {
        Ok(qncorr_ctx) => qncorr_ctx,
        Err(DryRun {}) => {
            info!("Dry run. No files will be written.");
            return 0;
        }
        Err(ClapError(inner)) => {
            // Swallow broken pipe errors
            trace!("clap error: {:?}", inner.kind());
            let _ = inner.print();
            match inner.kind() {
                DisplayHelp | DisplayVersion => return 0,
                _ => return 1,
            }
        }
        Err(e) => {
            eprintln!("error parsing args: {e}");
            return 1;
        }
    };

    match qncorr_ctx.run() {
        Ok(_) => {
            info!(
                "total duration: {:?}",
                get_durations().into_iter().fold(
                    Duration::ZERO,
                    |duration_sum, (name, duration)| {
                        info!("{} duration: {:?}", name, duration);
                        duration_sum + duration
                    }
                )
            );
            0
        }
        Err(e) => {
            eprintln!("correction error: {e}");
            1
        }
    }
}

fn main() {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );
    trace!("start main");
    let retcode = main_with_args(env::args());
    trace!("end main");
    std::process::exit(retcode);
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Write};

    use tempfile::tempdir;

    use super::main_with_args;

    #[test]
    fn main_with_version_succeeds() {
        assert_eq!(main_with_args(["qncorr", "--version"]), 0);
    }

    #[test]
    fn main_with_help_succeeds() {
        assert_eq!(main_with_args(["qncorr", "--help"]), 0);
    }

    #[test]
    fn main_with_dry_run_doesnt_crash() {
        #[rustfmt::skip]
        assert_eq!(
            main_with_args([
                "qncorr",
                "-e", "events.csv",
                "-d", "TPC",
                "--dry-run",
            ]),
            0
        );
    }

    #[test]
    fn main_with_bad_arg_returns_1() {
        #[rustfmt::skip]
        assert_ne!(
            main_with_args([
                "qncorr",
                "-e", "events.csv",
                "-d", "TPC",
                "--harmonics", "0",
            ]),
            0
        );
    }

    #[test]
    fn main_with_missing_events_returns_1() {
        let tmp_dir = tempdir().unwrap();
        let events_path = tmp_dir.path().join("missing.csv");
        #[rustfmt::skip]
        assert_eq!(
            main_with_args([
                "qncorr",
                "-e", events_path.to_str().unwrap(),
                "-d", "TPC",
                "--no-draw-progress",
            ]),
            1
        );
    }

    #[test]
    fn main_succesful_writes_calibration() {
        let tmp_dir = tempdir().unwrap();
        let events_path = tmp_dir.path().join("events.csv");
        let calibration_path = tmp_dir.path().join("pass1.qncal");
        let mut events = File::create(&events_path).unwrap();
        writeln!(events, "event,detector,channel,phi,weight,centrality").unwrap();
        for event in 0..5 {
            writeln!(events, "{event},TPC,,{},1,25", 0.3 * event as f64).unwrap();
        }
        drop(events);

        #[rustfmt::skip]
        assert_eq!(
            main_with_args([
                "qncorr",
                "-e", events_path.to_str().unwrap(),
                "-d", "TPC",
                "--class-var", "centrality:2:0:100",
                "-C", calibration_path.to_str().unwrap(),
                "--no-draw-progress",
            ]),
            0
        );

        assert!(calibration_path.exists());
        assert!(calibration_path.metadata().unwrap().len() > 0);
    }
}
