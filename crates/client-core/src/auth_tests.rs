use std::collections::VecDeque;

use super::*;

/// Replays canned answers and records everything it was asked to do.
#[derive(Default)]
struct ScriptedPrompt {
    answers: VecDeque<io::Result<String>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedPrompt {
    fn answering<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(|a| Ok(a.into())).collect(),
            log: Arc::default(),
        }
    }

    fn failing(kind: io::ErrorKind) -> Self {
        Self {
            answers: VecDeque::from([Err(kind.into())]),
            log: Arc::default(),
        }
    }

    fn next(&mut self) -> io::Result<String> {
        self.answers
            .pop_front()
            .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::UnexpectedEof, "script exhausted")))
    }
}

impl PromptIo for ScriptedPrompt {
    fn announce(&mut self, text: &str) -> io::Result<()> {
        self.log.lock().unwrap().push(format!("announce:{text}"));
        Ok(())
    }

    fn read_visible(&mut self, prompt: &str) -> io::Result<String> {
        self.log.lock().unwrap().push(format!("visible:{prompt}"));
        self.next()
    }

    fn read_hidden(&mut self, prompt: &str) -> io::Result<String> {
        self.log.lock().unwrap().push(format!("hidden:{prompt}"));
        self.next()
    }
}

#[test]
fn zero_questions_only_announces() {
    let mut io = ScriptedPrompt::answering(["never read"]);
    let log = io.log.clone();

    let answers = answer_challenge(&mut io, "alice", "Welcome to the bastion", &[]).unwrap();

    assert!(answers.is_empty());
    assert_eq!(*log.lock().unwrap(), vec!["announce:alice Welcome to the bastion".to_string()]);
    assert_eq!(io.answers.len(), 1, "no input should be consumed");
}

#[test]
fn answers_follow_question_order_and_echo_mode() {
    let mut io = ScriptedPrompt::answering(["alice", "hunter2", "123456"]);
    let log = io.log.clone();
    let questions = [
        PromptQuestion::new("Username: ", true),
        PromptQuestion::new("Password: ", false),
        PromptQuestion::new("OTP: ", false),
    ];

    let answers = answer_challenge(&mut io, "alice", "", &questions).unwrap();

    assert_eq!(answers, vec!["alice", "hunter2", "123456"]);
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "visible:Username: ".to_string(),
            "hidden:Password: ".to_string(),
            "hidden:OTP: ".to_string(),
        ]
    );
}

#[test]
fn instruction_is_shown_before_questions() {
    let mut io = ScriptedPrompt::answering(["yes"]);
    let log = io.log.clone();

    answer_challenge(&mut io, "bob", "Approve the push notification", &[PromptQuestion::new("Done? ", true)]).unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log[0], "announce:Approve the push notification");
    assert_eq!(log[1], "visible:Done? ");
}

#[test]
fn read_failure_aborts_the_exchange() {
    let mut io = ScriptedPrompt::failing(io::ErrorKind::UnexpectedEof);
    let questions = [PromptQuestion::new("Password: ", false), PromptQuestion::new("OTP: ", false)];

    let err = answer_challenge(&mut io, "alice", "", &questions).unwrap_err();

    assert!(matches!(err, ClientError::PromptRead(ref e) if e.kind() == io::ErrorKind::UnexpectedEof), "{err:?}");
}

#[tokio::test]
async fn interactive_prompt_answers_on_blocking_thread() {
    let prompt = InteractivePrompt::new(ScriptedPrompt::answering(["424242"]));

    let answers = prompt
        .respond("carol", "", vec![PromptQuestion::new("Verification code: ", false)])
        .await
        .unwrap();

    assert_eq!(answers, vec!["424242"]);
}

#[test]
fn interactive_auth_always_builds() {
    assert_eq!(interactive_auth().label(), "keyboard-interactive");
    assert_eq!(interactive_auth_with(ScriptedPrompt::default()).label(), "keyboard-interactive");
}

#[tokio::test]
async fn unset_agent_socket_is_unavailable() {
    let err = resolve_agent_auth_from(None).await.unwrap_err();
    assert!(matches!(err, ClientError::AgentUnavailable(_)), "{err:?}");

    let err = resolve_agent_auth_from(Some(PathBuf::new())).await.unwrap_err();
    assert!(matches!(err, ClientError::AgentUnavailable(_)), "{err:?}");
}

#[tokio::test]
async fn unreachable_agent_socket_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let err = resolve_agent_auth_from(Some(dir.path().join("missing.sock"))).await.unwrap_err();
    assert!(matches!(err, ClientError::AgentUnavailable(_)), "{err:?}");
}

#[tokio::test]
async fn invalid_identity_file_is_a_crypto_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("id_bogus");
    std::fs::write(&path, "not a key").unwrap();

    let err = identity_auth(&path).await.unwrap_err();
    assert!(matches!(err, ClientError::Crypto(_)), "{err:?}");
}

#[test]
fn labels_name_the_method() {
    let password = password_auth(SecretString::from("hunter2".to_string()));
    assert_eq!(password.label(), "password");
    assert_eq!(format!("{password:?}"), "password");
}

#[test]
fn password_prompt_waits_until_attempted() {
    let io = ScriptedPrompt::answering(["hunter2"]);
    let log = io.log.clone();

    let method = password_prompt_auth_with("alice@bastion's password: ", io);

    assert_eq!(method.label(), "password");
    assert!(log.lock().unwrap().is_empty(), "building the method must not prompt");
}

#[tokio::test]
async fn secret_is_read_hidden_on_blocking_thread() {
    let io = ScriptedPrompt::answering(["hunter2"]);
    let log = io.log.clone();
    let prompt = InteractivePrompt::new(io);

    let secret = prompt.read_secret("Password: ").await.unwrap();

    assert_eq!(secret.expose_secret(), "hunter2");
    assert_eq!(*log.lock().unwrap(), vec!["hidden:Password: ".to_string()]);
}

#[tokio::test]
async fn failed_secret_read_is_a_prompt_error() {
    let prompt = InteractivePrompt::new(ScriptedPrompt::failing(io::ErrorKind::UnexpectedEof));
    let err = prompt.read_secret("Password: ").await.unwrap_err();
    assert!(matches!(err, ClientError::PromptRead(_)), "{err:?}");
}
