//! Worker Script Generator
//!
//! Renders the bash wrapper run by every graph node. Invoked as
//! `runjob.sh <job index> <completion marker> [extra arguments...]`, the
//! wrapper:
//!
//! 1. derives a scratch directory name from a hash of its arguments
//! 2. stages the input files into it
//! 3. sets up the environment (custom script or alienv packages)
//! 4. resolves the output directory for the job index
//! 5. locates and runs the executable, logging stdout and stderr
//! 6. archives the outputs
//! 7. transfers everything to the output directory, with retries
//! 8. removes the scratch directory and touches the completion marker
//!
//! The payload exit status is recorded and reported but never stops the
//! wrapper: outputs of a failed run are still archived and transferred,
//! and the marker means "lifecycle completed", not "payload succeeded".

use std::fs;
use std::path::Path;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::template::TemplateEngine;
use crate::description::{JobDescription, OutputDestination, Stage};
use crate::error::{GeneratorError, Result};

/// Package environment activation tool on CVMFS.
pub const ALIENV: &str = "/cvmfs/alice.cern.ch/bin/alienv";

/// Installation root used as an executable fallback location.
pub const INSTALL_ROOT_VAR: &str = "ALIDPG_ROOT";

/// Attempts per file before a transfer is abandoned.
pub const TRANSFER_ATTEMPTS: u32 = 5;

static ENV_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid variable name regex"));

const WORKER_TEMPLATE: &str = r#"#!/bin/bash -ex
# {{ stage }} worker generated by jdl2makeflow
# Usage: {{ script }} <job index> <completion marker> [extra arguments...]
type zip
JOBHASH=$(echo "$*" | sha1sum | awk '{print $1}')
JOBID=$1
DONEFILE="$PWD/$2"
shift 2
SCRATCH="$PWD/job-$JOBHASH"
rm -rf "$SCRATCH"
mkdir "$SCRATCH"
cd "$SCRATCH"

INPUT_LIST=(
{% for file in inputs %}
  "{{ file | dquote }}"
{% endfor %}
)
for INP in "${INPUT_LIST[@]}"; do
  cp -v ../"$INP" .
done

{% if source_env %}
# Custom environment
source "{{ source_env | dquote }}"
{% else %}
eval "$({{ alienv }} printenv "{{ packages | dquote }}")"
{% endif %}

# Job environment
{% for var in environment %}
export {{ var.name }}="{{ var.value | dquote }}"
{% endfor %}

# Output directory
OUTPUT_DIR=$(printf -- "{{ output_dir | dquote }}" "$JOBID")
export ALIEN_JDL_OUTPUTDIR="$OUTPUT_DIR"
echo "Output will be in $OUTPUT_DIR"

# Run the payload: its exit status is recorded, never fatal
MAINERR=0
MAINLOGS=(stdout.log stderr.log)
PROG="{{ executable | dquote }}"
ARGS=$(printf -- "{{ args | dquote }}" "$JOBID")
{% if dry_run %}
echo "Doing nothing: dry run" > stdout.log
touch stderr.log
{% else %}
type "$PROG" &> /dev/null || PROG="{{ executable | basename | dquote }}"
type "$PROG" &> /dev/null || PROG="${{ install_root }}/bin/{{ executable | basename | dquote }}"
type "$PROG" &> /dev/null || PROG="./{{ executable | basename | dquote }}"
"$PROG" "$@" $ARGS > >(tee stdout.log) 2> >(tee stderr.log >&2) || MAINERR=$?
{% endif %}
if [[ $MAINERR != 0 ]]; then
  echo "Exited with errors ($MAINERR)"
else
  echo "Exited with no errors"
fi

# Archive outputs; zip exit code 12 means "nothing to do"
archive_output() {
  local ZIP=$1 LEVEL=$2 ZIPERR=0
  shift 2
  echo "$ZIP will contain $*"
  zip "$LEVEL" tmparchive.zip "$@" || ZIPERR=$?
  if [[ $ZIPERR == 12 ]]; then
    echo "Zip $ZIP would be empty: not creating"
    return 0
  fi
  [[ $ZIPERR == 0 ]] || return $ZIPERR
  rm -f "$@"
  mv tmparchive.zip "to_transfer/$ZIP"
}

keep_output() {
  echo "Not archiving $*"
  mv -v "$@" to_transfer/ || true
}

mkdir to_transfer
{% for out in outputs %}
{% if out.archive %}
archive_output "{{ out.archive | dquote }}" {{ out.zip_flag }} {{ out.patterns }}
{% else %}
keep_output {{ out.patterns }}
{% endif %}
{% endfor %}

# Copy files to destination (filesystem or xrootd)
TRANSFER_ATTEMPTS={{ transfer_attempts }}
PROTO=${OUTPUT_DIR%%://*}
[[ $PROTO != "$OUTPUT_DIR" ]] || PROTO=local
if [[ $PROTO != local && $PROTO != root ]]; then
  echo "Output protocol $PROTO not supported"
  exit 1
fi
[[ $PROTO != local ]] || mkdir -p "$OUTPUT_DIR"

transfer_file() {
  local FILE=$1 I
  for ((I=1; I<=TRANSFER_ATTEMPTS; I++)); do
    echo "Transferring $FILE to $OUTPUT_DIR (attempt $I/$TRANSFER_ATTEMPTS)"
    case $PROTO in
      local) mkdir -p "$(dirname "$OUTPUT_DIR/$FILE")" && cp -v "$FILE" "$OUTPUT_DIR/$FILE" && return 0 ;;
      root)  xrdcp -f "$FILE" "$OUTPUT_DIR/$FILE" && return 0 ;;
    esac
  done
  echo "Giving up on $FILE after $TRANSFER_ATTEMPTS attempts"
  return 1
}

TRANSFER_FAILED=0
pushd to_transfer
while read -r FILE; do
  transfer_file "$FILE" || TRANSFER_FAILED=$((TRANSFER_FAILED + 1))
done < <(find . -type f | sed -e 's|^\./||')
popd

# Cleanup all
cd ..
rm -rf "$SCRATCH"

# Signal completion of the wrapper lifecycle
echo "Workflow execution completed: $PROG $ARGS exited with $MAINERR (logs: ${MAINLOGS[*]})"
[[ $TRANSFER_FAILED == 0 ]] || echo "$TRANSFER_FAILED file(s) could not be transferred"
touch "$DONEFILE"
"#;

#[derive(Debug, Serialize)]
struct EnvVar {
    name: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct OutputEntry {
    archive: Option<String>,
    zip_flag: &'static str,
    /// Space separated, escaped glob words.
    patterns: String,
}

#[derive(Debug, Serialize)]
struct WorkerModel {
    stage: &'static str,
    script: &'static str,
    inputs: Vec<String>,
    source_env: Option<String>,
    alienv: &'static str,
    packages: String,
    environment: Vec<EnvVar>,
    output_dir: String,
    executable: String,
    args: String,
    install_root: &'static str,
    dry_run: bool,
    outputs: Vec<OutputEntry>,
    transfer_attempts: u32,
}

/// A worker script for one stage.
#[derive(Debug)]
pub struct WorkerScript {
    stage: Stage,
    model: WorkerModel,
}

impl WorkerScript {
    /// Prepares the script of `stage` from its job description.
    ///
    /// Fails before rendering when the output directory uses an
    /// unsupported protocol or an environment variable name is not a
    /// valid shell identifier.
    pub fn from_description(stage: Stage, desc: &JobDescription, dry_run: bool) -> Result<Self> {
        let output_dir = desc.output_dir()?;
        let destination = OutputDestination::parse(&output_dir)?;
        debug!(
            "Stage {} transfers to {} ({})",
            stage,
            output_dir,
            destination.protocol()
        );

        let environment = desc
            .environment()?
            .into_iter()
            .map(|(name, value)| {
                if ENV_NAME.is_match(&name) {
                    Ok(EnvVar { name, value })
                } else {
                    Err(GeneratorError::Config(format!(
                        "environment variable name \"{}\" is not a valid shell identifier",
                        name
                    )))
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let outputs = desc
            .outputs()?
            .into_iter()
            .filter(|o| !o.patterns.is_empty())
            .map(|o| OutputEntry {
                zip_flag: o.compression().zip_flag(),
                patterns: o
                    .patterns
                    .iter()
                    .map(|p| glob_word(p))
                    .collect::<Vec<_>>()
                    .join(" "),
                archive: o.archive,
            })
            .collect();

        let model = WorkerModel {
            stage: stage.name(),
            script: stage.script_name(),
            inputs: desc.input_files()?,
            source_env: desc.source_env_script()?,
            alienv: ALIENV,
            packages: desc.packages()?.join(","),
            environment,
            output_dir,
            executable: desc.executable()?,
            args: desc.split_arguments()?,
            install_root: INSTALL_ROOT_VAR,
            dry_run,
            outputs,
            transfer_attempts: TRANSFER_ATTEMPTS,
        };

        Ok(Self { stage, model })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Renders the script text.
    pub fn render(&self, engine: &TemplateEngine) -> Result<String> {
        engine.render(WORKER_TEMPLATE, &self.model)
    }

    /// Writes the script to `path` and makes it executable.
    pub fn write_to(&self, engine: &TemplateEngine, path: &Path) -> Result<()> {
        fs::write(path, self.render(engine)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
        }

        debug!("Wrote worker script {}", path.display());
        Ok(())
    }
}

/// Escapes a glob for bash, leaving wildcard characters active.
fn glob_word(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        let safe = c.is_ascii_alphanumeric()
            || matches!(
                c,
                '_' | '.' | '/' | '-' | '+' | '*' | '?' | '[' | ']' | '%' | '=' | '@' | ','
            );
        if !safe {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{fields, JobRange, Value};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn description() -> JobDescription {
        let mut desc = JobDescription::new();
        desc.insert(fields::EXECUTABLE, Value::from("/alice/bin/aliroot_dpgsim.sh"));
        desc.insert(fields::SPLIT_ARGUMENTS, Value::from("--run 244918 --uid %i"));
        desc.insert(fields::PACKAGES, Value::list(["VO_ALICE@AliDPG::v5", "VO_ALICE@AliPhysics::v5"]));
        desc.insert(fields::JOB_RANGE, JobRange::new(1, 3).unwrap().to_value());
        desc.insert(
            fields::OUTPUT,
            Value::list(["root_archive.zip:AliESDs.root,galice.root", "log_archive.zip:std*,*.log", "qa_plots/*"]),
        );
        desc.insert(fields::INPUT_FILE, Value::list(["sim.C", "rec.C"]));
        desc.insert(fields::OUTPUT_DIR, Value::from("/data/LHC18a1/%03i"));
        let mut env = BTreeMap::new();
        env.insert("ALIEN_JDL_LPMRUNNUMBER".to_string(), Value::from("244918"));
        env.insert("ALIDPG_OPTS".to_string(), Value::from(r#"title="a $b""#));
        desc.insert(fields::ENVIRONMENT, Value::Map(env));
        desc
    }

    fn render(desc: &JobDescription, dry_run: bool) -> String {
        WorkerScript::from_description(Stage::Sim, desc, dry_run)
            .unwrap()
            .render(&TemplateEngine::new())
            .unwrap()
    }

    #[test]
    fn test_script_stages_inputs_and_environment() {
        let script = render(&description(), false);

        assert!(script.starts_with("#!/bin/bash -ex\n"));
        assert!(script.contains("  \"sim.C\"\n  \"rec.C\"\n"));
        assert!(script.contains(
            "eval \"$(/cvmfs/alice.cern.ch/bin/alienv printenv \"VO_ALICE@AliDPG::v5,VO_ALICE@AliPhysics::v5\")\""
        ));
        assert!(script.contains("export ALIEN_JDL_LPMRUNNUMBER=\"244918\"\n"));
        assert!(script.contains(r#"export ALIDPG_OPTS="title=\"a \$b\"""#));
    }

    #[test]
    fn test_script_resolves_executable_in_order() {
        let script = render(&description(), false);

        let literal = script.find("PROG=\"/alice/bin/aliroot_dpgsim.sh\"").unwrap();
        let bare = script.find("|| PROG=\"aliroot_dpgsim.sh\"").unwrap();
        let install = script.find("|| PROG=\"$ALIDPG_ROOT/bin/aliroot_dpgsim.sh\"").unwrap();
        let local = script.find("|| PROG=\"./aliroot_dpgsim.sh\"").unwrap();
        assert!(literal < bare && bare < install && install < local);

        assert!(script.contains("ARGS=$(printf -- \"--run 244918 --uid %i\" \"$JOBID\")"));
        assert!(script.contains("|| MAINERR=$?"));
    }

    #[test]
    fn test_script_archives_with_chosen_compression() {
        let script = render(&description(), false);

        assert!(script.contains("archive_output \"root_archive.zip\" -0 AliESDs.root galice.root\n"));
        assert!(script.contains("archive_output \"log_archive.zip\" -9 std* *.log\n"));
        assert!(script.contains("keep_output qa_plots/*\n"));
    }

    #[test]
    fn test_script_transfer_and_completion() {
        let script = render(&description(), false);

        assert!(script.contains("OUTPUT_DIR=$(printf -- \"/data/LHC18a1/%03i\" \"$JOBID\")"));
        assert!(script.contains("TRANSFER_ATTEMPTS=5\n"));
        assert!(script.contains("xrdcp -f"));

        let cleanup = script.find("rm -rf \"$SCRATCH\"\n\n").unwrap();
        let marker = script.find("touch \"$DONEFILE\"").unwrap();
        assert!(cleanup < marker);
        assert!(script.trim_end().ends_with("touch \"$DONEFILE\""));
    }

    #[test]
    fn test_dry_run_skips_payload() {
        let script = render(&description(), true);

        assert!(script.contains("echo \"Doing nothing: dry run\" > stdout.log"));
        assert!(!script.contains("\"$PROG\" \"$@\" $ARGS"));
        assert!(script.contains("MAINERR=0"));
    }

    #[test]
    fn test_source_env_replaces_alienv() {
        let mut desc = description();
        desc.insert(fields::SOURCE_ENV_SCRIPT, Value::from("setup_env.sh"));
        let script = render(&desc, false);

        assert!(script.contains("source \"setup_env.sh\""));
        assert!(!script.contains("alienv printenv"));
    }

    #[test]
    fn test_unsupported_protocol_rejected_before_rendering() {
        let mut desc = description();
        desc.insert(fields::OUTPUT_DIR, Value::from("gsiftp://se.cern.ch/out/%i"));
        let err = WorkerScript::from_description(Stage::Sim, &desc, false).unwrap_err();
        assert!(matches!(err, GeneratorError::UnsupportedProtocol { .. }));
    }

    #[test]
    fn test_invalid_variable_name_rejected() {
        let mut desc = description();
        let mut env = BTreeMap::new();
        env.insert("BAD NAME".to_string(), Value::from("x"));
        desc.insert(fields::ENVIRONMENT, Value::Map(env));
        assert!(WorkerScript::from_description(Stage::Sim, &desc, false).is_err());
    }

    #[test]
    fn test_glob_word_escaping() {
        assert_eq!(glob_word("*QAresults*.root"), "*QAresults*.root");
        assert_eq!(glob_word("a b;rm"), "a\\ b\\;rm");
        assert_eq!(glob_word("$(x)"), "\\$\\(x\\)");
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let desc = description();
        assert_eq!(render(&desc, false), render(&desc, false));
    }

    #[cfg(unix)]
    mod lifecycle {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::PathBuf;
        use std::process::{Command, Output};

        const PAYLOAD: &str = "#!/bin/bash\n\
            echo \"payload $* in $JOB_FLAVOUR\"\n\
            echo warning >&2\n\
            echo result > result.txt\n\
            mkdir -p qa_plots && echo plot > qa_plots/plot.txt\n\
            exit 3\n";

        fn tools_available() -> bool {
            ["zip", "sha1sum"].iter().all(|tool| {
                Command::new("sh")
                    .args(["-c", &format!("command -v {}", tool)])
                    .output()
                    .map(|o| o.status.success())
                    .unwrap_or(false)
            })
        }

        /// Work dir holding `runjob.sh`, its payload and environment script.
        fn workdir(root: &Path, outputs: &[&str]) -> PathBuf {
            let workdir = root.join("work");
            fs::create_dir(&workdir).unwrap();

            let payload = workdir.join("payload.sh");
            fs::write(&payload, PAYLOAD).unwrap();
            fs::set_permissions(&payload, fs::Permissions::from_mode(0o755)).unwrap();
            fs::write(workdir.join("job_env.sh"), "export JOB_FLAVOUR=local\n").unwrap();

            let mut desc = JobDescription::new();
            desc.insert(fields::EXECUTABLE, Value::from("payload.sh"));
            desc.insert(fields::SPLIT_ARGUMENTS, Value::from("--uid %i"));
            desc.insert(fields::INPUT_FILE, Value::list(["payload.sh", "job_env.sh"]));
            desc.insert(fields::SOURCE_ENV_SCRIPT, Value::from("./job_env.sh"));
            desc.insert(fields::OUTPUT, Value::list(outputs.iter().copied()));
            let output_dir = root.join("out").join("%03i");
            desc.insert(fields::OUTPUT_DIR, Value::from(output_dir.to_str().unwrap()));

            WorkerScript::from_description(Stage::Sim, &desc, false)
                .unwrap()
                .write_to(&TemplateEngine::new(), &workdir.join("runjob.sh"))
                .unwrap();
            workdir
        }

        fn run_job(workdir: &Path) -> Output {
            let script = workdir.join("runjob.sh");
            loop {
                match Command::new(&script)
                    .args(["2", "job0002.done"])
                    .current_dir(workdir)
                    .output()
                {
                    // ETXTBSY while another test thread still holds a write fd
                    Err(e) if e.raw_os_error() == Some(26) => {
                        std::thread::sleep(std::time::Duration::from_millis(50))
                    }
                    other => return other.unwrap(),
                }
            }
        }

        fn combined(output: &Output) -> String {
            format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            )
        }

        fn scratch_dirs(workdir: &Path) -> usize {
            fs::read_dir(workdir)
                .unwrap()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().starts_with("job-"))
                .count()
        }

        #[test]
        fn test_failed_payload_still_completes_lifecycle() {
            if !tools_available() {
                eprintln!("zip or sha1sum not installed, skipping");
                return;
            }
            let temp_dir = tempdir().unwrap();
            let workdir = workdir(
                temp_dir.path(),
                &["log_archive.zip:std*", "empty.zip:nomatch*", "result.txt"],
            );

            let output = run_job(&workdir);
            let log = combined(&output);

            assert!(output.status.success(), "{}", log);
            assert!(workdir.join("job0002.done").exists());
            let out = temp_dir.path().join("out").join("002");
            assert!(out.join("log_archive.zip").is_file(), "{}", log);
            assert!(out.join("result.txt").is_file());
            assert!(!out.join("empty.zip").exists());
            assert_eq!(scratch_dirs(&workdir), 0);
            assert!(log.contains("payload --uid 2 in local"), "{}", log);
            assert!(log.contains("Zip empty.zip would be empty: not creating"));
            assert!(log.contains("exited with 3"), "{}", log);
        }

        #[test]
        fn test_failed_transfer_gives_up_and_continues() {
            if !tools_available() {
                eprintln!("zip or sha1sum not installed, skipping");
                return;
            }
            let temp_dir = tempdir().unwrap();
            let workdir = workdir(temp_dir.path(), &["log_archive.zip:std*", "qa_plots"]);

            // a regular file where the qa_plots directory has to go
            let out = temp_dir.path().join("out").join("002");
            fs::create_dir_all(&out).unwrap();
            fs::write(out.join("qa_plots"), "in the way").unwrap();

            let output = run_job(&workdir);
            let log = combined(&output);

            assert!(output.status.success(), "{}", log);
            assert!(log.contains("Transferring qa_plots/plot.txt to"), "{}", log);
            assert!(log.contains("(attempt 5/5)"), "{}", log);
            assert!(log.contains("Giving up on qa_plots/plot.txt after 5 attempts"));
            assert!(log.contains("1 file(s) could not be transferred"));
            assert!(out.join("log_archive.zip").is_file());
            assert!(workdir.join("job0002.done").exists());
            assert_eq!(scratch_dirs(&workdir), 0);
        }
    }

    #[test]
    fn test_write_to_makes_script_executable() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("runjob.sh");
        let script = WorkerScript::from_description(Stage::Sim, &description(), false).unwrap();
        script.write_to(&TemplateEngine::new(), &path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("# sim worker generated by jdl2makeflow"));
        assert!(content.contains("# Usage: runjob.sh <job index>"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }
}
