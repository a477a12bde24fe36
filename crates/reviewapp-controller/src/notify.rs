//! Pull request comment gate

/// Inputs to the comment decision
#[derive(Clone, Copy, Debug, Default)]
pub struct NotificationInputs<'a> {
    /// Commit annotation on the live ArgoCD Application
    pub applied_sha: Option<&'a str>,
    /// Commit of the last push
    pub cached_sha: Option<&'a str>,
    /// Whether `appConfig.message` is set
    pub message_configured: bool,
    /// `appConfig.sendMessageEveryTime`
    pub send_every_time: bool,
    /// `status.sync.alreadySentMessage`
    pub already_sent: bool,
}

/// What the comment phase should do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationDecision {
    /// ArgoCD has not applied the last push yet
    Wait,
    /// Applied; post the comment
    Send,
    /// Applied; nothing to post
    Skip,
}

/// Decide whether to post a comment
pub fn decide(inputs: NotificationInputs<'_>) -> NotificationDecision {
    let applied = matches!(
        (inputs.applied_sha, inputs.cached_sha),
        (Some(applied), Some(cached)) if applied == cached
    );
    if !applied {
        return NotificationDecision::Wait;
    }
    if inputs.message_configured && (inputs.send_every_time || !inputs.already_sent) {
        NotificationDecision::Send
    } else {
        NotificationDecision::Skip
    }
}
