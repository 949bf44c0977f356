// Publisher - pull-then-push of the snapshot branch to an SSH remote
// Pushing is optional and never undoes the commit it follows

use super::{SnapshotRepo, REMOTE_NAME};
use crate::error::PushError;
use git2::{
    AnnotatedCommit, Cred, CredentialType, ErrorClass, ErrorCode, FetchOptions, PushOptions,
    RemoteCallbacks, Repository, ResetType,
};
use std::cell::{Cell, RefCell};
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};

/// Where and how to push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub url: String,
    /// Tried in order when no ssh-agent is available
    pub ssh_keys: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    NoRemote,
    Pushed { branch: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshAuth {
    Agent,
    KeyFile(PathBuf),
}

impl SshAuth {
    pub fn resolve(ssh_keys: &[PathBuf]) -> Result<Self, PushError> {
        if std::env::var_os("SSH_AUTH_SOCK").is_some_and(|sock| !sock.is_empty()) {
            return Ok(SshAuth::Agent);
        }
        Self::from_key_files(ssh_keys)
    }

    fn from_key_files(ssh_keys: &[PathBuf]) -> Result<Self, PushError> {
        match ssh_keys.iter().find(|path| path.is_file()) {
            Some(path) => Ok(SshAuth::KeyFile(path.clone())),
            None => Err(PushError::MissingSshKey {
                path: ssh_keys
                    .first()
                    .cloned()
                    .unwrap_or_else(|| PathBuf::from("~/.ssh/id_ed25519")),
            }),
        }
    }
}

/// Remote callbacks answering SSH credential requests once.
///
/// libgit2 asks again after a rejected key; `attempts` stops that loop.
pub(crate) fn callbacks<'a>(auth: &'a SshAuth, attempts: &'a Cell<u32>) -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, username, allowed| {
        attempts.set(attempts.get() + 1);
        if attempts.get() > 1 {
            return Err(git2::Error::from_str("SSH key was rejected"));
        }
        if !allowed.contains(CredentialType::SSH_KEY) {
            return Err(git2::Error::from_str("remote does not accept SSH keys"));
        }

        let username = username.unwrap_or("git");
        match auth {
            SshAuth::Agent => Cred::ssh_key_from_agent(username),
            SshAuth::KeyFile(path) => Cred::ssh_key(username, None, path, None),
        }
    });
    callbacks
}

/// Push the current branch to `remote`, pulling upstream changes first.
///
/// Without `auto_confirm` the user is asked, and anything but yes declines.
#[instrument(skip_all)]
pub fn maybe_push(
    repo: &SnapshotRepo,
    remote: Option<&RemoteSettings>,
    auto_confirm: bool,
) -> Result<PushOutcome, PushError> {
    let Some(remote) = remote else {
        warn!("No git remote configured, skipping push");
        return Ok(PushOutcome::NoRemote);
    };

    if !auto_confirm && !confirm(&remote.url) {
        return Err(PushError::Declined);
    }

    if !is_ssh_url(&remote.url) {
        return Err(PushError::NonSshRemote {
            url: remote.url.clone(),
        });
    }

    let git = repo.repository();
    if git.head_detached()? {
        return Err(PushError::DetachedHead);
    }
    let branch = current_branch(git)?;

    ensure_origin(git, &remote.url)?;
    let auth = SshAuth::resolve(&remote.ssh_keys)?;

    fetch(git, &branch, &auth)?;
    merge_upstream(git, &branch)?;
    push(git, &branch, &auth)?;

    info!("Pushed {} to {}", branch, remote.url);
    Ok(PushOutcome::Pushed { branch })
}

fn confirm(url: &str) -> bool {
    if !std::io::stdin().is_terminal() {
        warn!("Not asking to push from a non-interactive session; pass --yes to push unattended");
        return false;
    }
    inquire::Confirm::new(&format!("Push snapshot to {}?", url))
        .with_default(false)
        .prompt()
        .unwrap_or(false)
}

/// `ssh://host/path` or scp-like `user@host:path`.
pub fn is_ssh_url(url: &str) -> bool {
    let url = url.trim();
    if let Some((scheme, _)) = url.split_once("://") {
        return matches!(scheme, "ssh" | "git+ssh" | "ssh+git");
    }

    match url.split_once(':') {
        Some((user_host, path)) => match user_host.split_once('@') {
            Some((user, host)) => !user.is_empty() && !host.is_empty() && !path.is_empty(),
            None => false,
        },
        None => false,
    }
}

fn current_branch(git: &Repository) -> Result<String, PushError> {
    let head = git.head()?;
    head.shorthand()
        .filter(|_| head.is_branch())
        .map(str::to_string)
        .ok_or(PushError::DetachedHead)
}

fn ensure_origin(git: &Repository, url: &str) -> Result<(), PushError> {
    match git.find_remote(REMOTE_NAME) {
        Ok(existing) if existing.url() == Some(url) => Ok(()),
        Ok(_) => {
            debug!("Pointing {} at {}", REMOTE_NAME, url);
            git.remote_set_url(REMOTE_NAME, url)?;
            Ok(())
        }
        Err(e) if e.code() == ErrorCode::NotFound => {
            git.remote(REMOTE_NAME, url)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn fetch(git: &Repository, branch: &str, auth: &SshAuth) -> Result<(), PushError> {
    let attempts = Cell::new(0);
    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks(auth, &attempts));

    let refspec = format!("+refs/heads/{0}:refs/remotes/{1}/{0}", branch, REMOTE_NAME);
    let mut remote = git.find_remote(REMOTE_NAME)?;
    remote
        .fetch(&[refspec.as_str()], Some(&mut options), None)
        .map_err(|e| classify(e, &attempts))?;
    debug!("Fetched {}/{}", REMOTE_NAME, branch);
    Ok(())
}

/// Bring `refs/remotes/origin/<branch>` into the local branch.
///
/// Missing upstream branch (empty remote) is fine; conflicts abort the merge.
pub(crate) fn merge_upstream(git: &Repository, branch: &str) -> Result<(), PushError> {
    let upstream_name = format!("refs/remotes/{}/{}", REMOTE_NAME, branch);
    let upstream_ref = match git.find_reference(&upstream_name) {
        Ok(reference) => reference,
        Err(e) if e.code() == ErrorCode::NotFound => {
            debug!("Remote has no {} yet", branch);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let upstream = git.reference_to_annotated_commit(&upstream_ref)?;
    let (analysis, _) = git.merge_analysis(&[&upstream])?;

    if analysis.is_up_to_date() {
        debug!("Already up to date with {}/{}", REMOTE_NAME, branch);
        Ok(())
    } else if analysis.is_fast_forward() {
        fast_forward(git, branch, &upstream)
    } else {
        merge_commit(git, branch, &upstream)
    }
}

fn fast_forward(
    git: &Repository,
    branch: &str,
    upstream: &AnnotatedCommit,
) -> Result<(), PushError> {
    let refname = format!("refs/heads/{}", branch);
    let mut reference = git.find_reference(&refname)?;
    reference.set_target(upstream.id(), "spotify-snapshot: fast-forward")?;
    git.set_head(&refname)?;
    git.checkout_head(Some(git2::build::CheckoutBuilder::default().force()))?;
    info!("Fast-forwarded {} to {}", branch, upstream.id());
    Ok(())
}

fn merge_commit(
    git: &Repository,
    branch: &str,
    upstream: &AnnotatedCommit,
) -> Result<(), PushError> {
    git.merge(&[upstream], None, None)?;

    let mut index = git.index()?;
    if index.has_conflicts() {
        let head = git.head()?.peel_to_commit()?;
        git.reset(head.as_object(), ResetType::Hard, None)?;
        git.cleanup_state()?;
        return Err(PushError::MergeConflict);
    }

    let tree = git.find_tree(index.write_tree()?)?;
    let signature = match git.signature() {
        Ok(signature) => signature,
        Err(_) => git2::Signature::now("spotify-snapshot", "spotify-snapshot@localhost")?,
    };
    let local = git.head()?.peel_to_commit()?;
    let remote = git.find_commit(upstream.id())?;
    let message = format!("Merge remote-tracking branch '{}/{}'", REMOTE_NAME, branch);

    git.commit(Some("HEAD"), &signature, &signature, &message, &tree, &[&local, &remote])?;
    git.cleanup_state()?;
    info!("Merged {}/{} into {}", REMOTE_NAME, branch, branch);
    Ok(())
}

fn push(git: &Repository, branch: &str, auth: &SshAuth) -> Result<(), PushError> {
    let attempts = Cell::new(0);
    let rejection: RefCell<Option<(String, String)>> = RefCell::new(None);

    {
        let mut callbacks = callbacks(auth, &attempts);
        callbacks.push_update_reference(|refname, status| {
            if let Some(status) = status {
                *rejection.borrow_mut() = Some((refname.to_string(), status.to_string()));
            }
            Ok(())
        });
        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);

        let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch);
        let mut remote = git.find_remote(REMOTE_NAME)?;
        remote
            .push(&[refspec.as_str()], Some(&mut options))
            .map_err(|e| classify(e, &attempts))?;
    }

    if let Some((refname, status)) = rejection.into_inner() {
        return Err(PushError::Rejected { refname, status });
    }
    Ok(())
}

fn classify(e: git2::Error, attempts: &Cell<u32>) -> PushError {
    if attempts.get() > 1 || e.code() == ErrorCode::Auth || e.class() == ErrorClass::Ssh {
        PushError::AuthenticationFailed {
            message: e.message().to_string(),
        }
    } else {
        PushError::Git(e)
    }
}
