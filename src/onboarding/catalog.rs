//! The ordered catalog of onboarding steps, and the fixed texts around it.

use crate::config::OnboardingConfig;
use crate::gateway::MemberId;

use super::history::INFO_MARKER;
use super::step::{AnswerAction, AnswerValidator, OnboardingStep, PollCondition, SkipRule};

const NAME_QUESTION: &str = "Meow! Welcome to the Scrimba community!

I am Scrimba's mascot, Pumpkin, and I am here to lend you a helping paw in joining Scrimba Discord community.

Right now, you can only see a couple of channels 😢.

There are *tonne* more to see, which I will unlock for you once you answer some questions.

First, **what is your first name?**";

const NAME_HELP: &str = "it's been a minute, and I still don't know your name 👉🥺👈.

Write your first name below and press ENTER to continue.";

const AVATAR_QUESTION: &str = "I couldn't help but notice you don't have a profile picture.

Please take a moment to set a Discord profile picture - it makes the communication feel more personal.

I will automatically detect when you've set a profile picture then send you the next step.";

const AVATAR_HELP: &str = "**Please take a moment to set a Discord profile picture**. Not sure how? Check out this article, https://www.businessinsider.com/how-to-change-discord-picture?r=US&IR=T";

const LINK_QUESTION: &str = "Next, please take a moment to connect your Scrimba and Discord accounts: https://scrimba.com/discord/connect

I will automatically detect when you click **Authorize** then send you the next step.";

const LINK_HELP: &str = "**Please take a moment to connect your Scrimba and Discord account**.

If you don't have a Scrimba account yet, create a free account here: https://scrimba.com.

If you clicked **Authorize** but nothing happened, please ensure you are not logged in to a different Discord account in your web browser.";

const VIDEO_QUESTION: &str = "Please watch this welcome video then click the ✅ emoji beneath to move on to the final step.

   https://youtu.be/lPIi430q5fk";

const INTRODUCTION_QUESTION: &str = "I just unlocked a channel called #introduce-yourself for you. Do you see it?

We ask all new members to introduce themselves. You can read about other new members then please write your own introduction!

You can introduce yourself any way you like but here's a template to make it easy. Just replace the `...` bits with your own information:

```
Hello 👋

My name is ... and I am from ...!

I am currently working/unemployed/studying at ...

When I am not coding, I enjoy ....

Looking forward to become a part of this epic/awesome/friendly community 🤩 🙏
```
Once you've done that, come back here and click the ✅ emoji beneath to unlock the whole server.";

/// Emoji that confirms a reaction-gated step.
pub const CONFIRM_EMOJI: &str = "✅";

/// Posted when a freshly linked account has an active subscription.
pub const PRO_NOTICE: &str = "ℹ️ Oh! You are a PRO member. I will add a special badge to your profile! https://media.giphy.com/media/g9582DNuQppxC/giphy.gif";

/// Direct message sent once onboarding completes.
pub const WELCOME_DM: &str = "Welcome to the Scrimba Discord community 👋

Joining a new Discord server can feel overwhelming, so we've gathered the most important information for you here.

**Step 1: Check out the most important channels**
In our community, you should first #👋introduce-yourself. Then, feel free to ask for #💼career-advice, and please #💻share-your-code if you have written something you're proud of. Finally, we also have a whole section dedicated to giving and getting coding help (more info below). You can also head over to one of our help channels if you're stuck, like #css-help, #javascript-help, or #react-help.

**Step 2: Remember to be nice**
We aim to be the friendliest space for developers to hang out. This means that there's no room for negativity, harsh criticism or bullying. If you misbehave, you will be given a warning and a 24 hour ban. If you misbehave once more, we'll need to ban you permanently.

We're excited to have you here!";

/// Warning posted before a stalled member is removed.
pub fn idle_warning(help_contact: MemberId) -> String {
    format!(
        "you've been on this step for a few minutes.

Remember, you can always message <@{help_contact}> from Scrimba if you're having trouble!

If, in a few minutes, you're still on this step, I will softly remove you from the server and delete this channel.  Don't worry! You can always join again and attempt the onboarding."
    )
}

/// Ordered, immutable list of steps.
#[derive(Debug, Clone)]
pub struct StepCatalog {
    steps: Vec<OnboardingStep>,
}

impl StepCatalog {
    pub fn new(steps: Vec<OnboardingStep>) -> Self {
        Self { steps }
    }

    /// The community's onboarding: name, avatar, account link, video, introduction.
    pub fn community(config: &OnboardingConfig) -> Self {
        let mut avatar = OnboardingStep::poll(AVATAR_QUESTION, PollCondition::AvatarSet)
            .with_help(AVATAR_HELP)
            .with_skip(SkipRule::IfAvatarSet);
        if let Some(path) = &config.avatar_example {
            avatar = avatar.with_attachment(path.clone());
        }

        Self::new(vec![
            OnboardingStep::text(
                NAME_QUESTION,
                AnswerValidator::FirstName,
                AnswerAction::SetNickname,
            )
            .with_help(NAME_HELP)
            .with_success(format!("{INFO_MARKER} Nice to meet you!")),
            avatar,
            OnboardingStep::poll(LINK_QUESTION, PollCondition::AccountLinked)
                .with_help(LINK_HELP)
                .with_skip(SkipRule::IfAccountLinked)
                .with_success(format!("{INFO_MARKER} Fantastik!")),
            OnboardingStep::reaction(VIDEO_QUESTION, CONFIRM_EMOJI)
                .with_success(format!("{INFO_MARKER} Great!")),
            OnboardingStep::reaction(INTRODUCTION_QUESTION, CONFIRM_EMOJI)
                .with_skip(SkipRule::UnlockRole(config.roles.introductions)),
        ])
    }

    pub fn get(&self, index: usize) -> Option<&OnboardingStep> {
        self.steps.get(index)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OnboardingStep> {
        self.steps.iter()
    }

    /// Index of the step whose question is exactly `text`.
    pub fn find_by_question(&self, text: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.question == text)
    }
}
