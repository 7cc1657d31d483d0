//! System prompt rendering for the generator agent.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::io::config::PairloopConfig;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");

/// Inputs to the generator's system prompt.
#[derive(Debug, Clone)]
pub struct SystemPromptInputs<'a> {
    pub language: &'a str,
    pub fence_open: &'a str,
    pub fence_close: &'a str,
    pub completion_token: &'a str,
    pub goal: Option<&'a str>,
}

impl<'a> SystemPromptInputs<'a> {
    pub fn from_config(config: &'a PairloopConfig) -> Self {
        Self {
            language: &config.agents.language,
            fence_open: &config.agents.fence_open,
            fence_close: &config.agents.fence_close,
            completion_token: &config.termination.completion_token,
            goal: config.agents.goal.as_deref(),
        }
    }
}

/// Render the system prompt that instructs the model to answer with exactly
/// one fenced block and to print the completion token when done.
pub fn render_system_prompt(inputs: &SystemPromptInputs<'_>) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("system", SYSTEM_TEMPLATE)
        .context("register system prompt template")?;
    let template = env.get_template("system")?;
    let rendered = template
        .render(context! {
            language => inputs.language,
            fence_open => inputs.fence_open,
            fence_close => inputs.fence_close,
            completion_token => inputs.completion_token,
            goal => inputs.goal.map(str::trim).filter(|s| !s.is_empty()),
        })
        .context("render system prompt")?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prompt_mentions_fence_and_token() {
        let config = PairloopConfig::default();
        let prompt = render_system_prompt(&SystemPromptInputs::from_config(&config)).expect("render");
        assert!(prompt.starts_with("You are the coder agent of a two-agent team writing R code."));
        assert!(!prompt.contains(" a R "));
        assert!(prompt.contains("```r\n# your code\n```"));
        assert!(prompt.contains("TASK_COMPLETE"));
        assert!(!prompt.contains("Your goal:"));
    }

    #[test]
    fn goal_is_included_when_set() {
        let mut config = PairloopConfig::default();
        config.agents.goal =
            Some("  Read dsc.csv and compute mean and std dev of 'aorta'.  ".to_string());
        let prompt = render_system_prompt(&SystemPromptInputs::from_config(&config)).expect("render");
        assert!(prompt.contains("Your goal:\nRead dsc.csv and compute mean and std dev of 'aorta'.\n"));
    }

    #[test]
    fn blank_goal_is_dropped() {
        let inputs = SystemPromptInputs {
            language: "Python",
            fence_open: "```python",
            fence_close: "```",
            completion_token: "DONE",
            goal: Some("   "),
        };
        let prompt = render_system_prompt(&inputs).expect("render");
        assert!(!prompt.contains("Your goal:"));
        assert!(prompt.contains("```python"));
        assert!(prompt.contains("literal token DONE"));
    }

    #[test]
    fn language_name_reads_naturally_for_any_article() {
        for language in ["R", "Python", "Elixir", "SQL"] {
            let inputs = SystemPromptInputs {
                language,
                fence_open: "```",
                fence_close: "```",
                completion_token: "DONE",
                goal: None,
            };
            let prompt = render_system_prompt(&inputs).expect("render");
            let first_line = prompt.lines().next().expect("first line");
            assert!(first_line.contains(&format!("writing {language} code")));
            assert!(!first_line.contains(&format!(" a {language} ")));
            assert!(!first_line.contains(&format!(" an {language} ")));
        }
    }
}
