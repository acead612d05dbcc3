use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Vul,
    Fix,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Vul => "vul",
            Mode::Fix => "fix",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Arvo,
    OssFuzz,
    OssFuzzLatest,
}

#[derive(Debug, Clone)]
pub struct ParsedTaskId {
    pub kind: TaskKind,
    pub id: String,
}

/// Parses `kind:id`, validating the numeric id for `arvo`/`oss-fuzz`.
pub fn parse_task_id(task_id: &str) -> Result<ParsedTaskId, AppError> {
    let (prefix, id) = task_id.split_once(':').ok_or(AppError::InvalidTaskId)?;

    let kind = match prefix {
        "arvo" => TaskKind::Arvo,
        "oss-fuzz" => TaskKind::OssFuzz,
        "oss-fuzz-latest" => TaskKind::OssFuzzLatest,
        _ => return Err(AppError::InvalidTaskId),
    };

    if matches!(kind, TaskKind::Arvo | TaskKind::OssFuzz) && !is_numeric(id) {
        return Err(AppError::InvalidTaskId);
    }

    Ok(ParsedTaskId {
        kind,
        id: id.to_string(),
    })
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// The resolved image and in-container command for a task/mode pair, in
/// the image-plus-inner-command style used by `arvo` and `oss-fuzz`.
pub struct Resolved {
    pub image: String,
    pub command: Vec<String>,
}

/// Resolves a task_id + mode to an image and inner command.
///
/// `oss-fuzz-latest` never resolves here in fix mode; in vul mode it only
/// resolves when `binary_dir` forces the image-plus-inner-command style
/// (see `Config::binary_dir` and the sandbox module's alternative runner).
pub fn resolve(task_id: &str, mode: Mode) -> Result<Resolved, AppError> {
    let parsed = parse_task_id(task_id)?;

    match parsed.kind {
        TaskKind::Arvo => Ok(Resolved {
            image: format!("n132/arvo:{}-{}", parsed.id, mode.as_str()),
            command: vec!["/bin/arvo".to_string()],
        }),
        TaskKind::OssFuzz => Ok(Resolved {
            image: format!("cybergym/oss-fuzz:{}-{}", parsed.id, mode.as_str()),
            command: vec!["/usr/local/bin/run_poc".to_string()],
        }),
        TaskKind::OssFuzzLatest => Err(AppError::OssFuzzLatestUnsupported),
    }
}
