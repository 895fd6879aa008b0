//! The `prompts` provider: reusable prompt templates.
//!
//! Prompt arguments travel as strings, so flags such as `include_examples`
//! are declared as strings and read as `"true"`/`"false"`.

use std::fmt::Write as _;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{parse_options, Provider};
use crate::capability::{
    handler_fn, Arguments, CapabilityDescriptor, InvocationResult, Output, ParamSpec, ParamType,
    PromptMessage,
};

/// Provider id used in the configuration document.
pub const PROVIDER_ID: &str = "prompts";

/// Options accepted under `providers.prompts.config`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptsOptions {
    /// Text appended to every rendered prompt, e.g. house style rules.
    #[serde(default)]
    pub footer: Option<String>,
}

/// Code review, documentation, data analysis, problem solving and test generation prompts.
#[derive(Debug, Clone, Default)]
pub struct PromptsProvider {
    options: PromptsOptions,
}

impl PromptsProvider {
    /// Creates the provider from its option map.
    ///
    /// # Errors
    ///
    /// Returns a message if the options do not deserialise.
    pub fn from_options(options: &Map<String, Value>) -> Result<Self, String> {
        Ok(Self {
            options: parse_options(options)?,
        })
    }
}

type Render = fn(&Arguments) -> (String, String);

fn prompt(name: &str, footer: Option<&String>, render: Render) -> CapabilityDescriptor {
    let footer = footer.cloned();
    CapabilityDescriptor::prompt(
        name,
        handler_fn(move |args: Arguments| {
            let footer = footer.clone();
            async move {
                let (title, mut body) = render(&args);
                if let Some(footer) = footer {
                    body.push_str("\n\n");
                    body.push_str(&footer);
                }
                InvocationResult::Success(Output::Prompt {
                    description: Some(title),
                    messages: vec![PromptMessage::user(body)],
                })
            }
        }),
    )
}

fn text(name: &str, default: &str, description: &str) -> ParamSpec {
    ParamSpec::optional(name, ParamType::String)
        .with_default(json!(default))
        .describe(description)
}

impl Provider for PromptsProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn descriptors(&self) -> Result<Vec<CapabilityDescriptor>, String> {
        let footer = self.options.footer.as_ref();

        Ok(vec![
            prompt("code_review", footer, code_review)
                .with_title("Code Review")
                .with_description("Generate a comprehensive code review prompt.")
                .with_param(ParamSpec::required("code", ParamType::String).describe("Code to review"))
                .with_param(text("language", "python", "Programming language"))
                .with_param(text(
                    "focus_areas",
                    "all",
                    "all, security, performance, style or bugs",
                ))
                .with_param(text("severity_level", "standard", "lenient, standard or strict")),
            prompt("generate_documentation", footer, documentation)
                .with_title("Documentation Generator")
                .with_description("Generate a documentation-writing prompt for a piece of code.")
                .with_param(ParamSpec::required("code", ParamType::String).describe("Code to document"))
                .with_param(text("doc_type", "api", "api, user_guide, technical or readme"))
                .with_param(text("format_type", "markdown", "markdown, rst, html or plain"))
                .with_param(text("include_examples", "true", "Include usage examples (true/false)"))
                .with_param(text(
                    "target_audience",
                    "developers",
                    "developers, users, beginners or experts",
                )),
            prompt("analyze_data", footer, analyze_data)
                .with_title("Data Analysis")
                .with_description("Generate a data analysis prompt.")
                .with_param(
                    ParamSpec::required("data_description", ParamType::String)
                        .describe("Description of the data to analyze"),
                )
                .with_param(text(
                    "analysis_type",
                    "exploratory",
                    "exploratory, statistical, predictive or comparative",
                ))
                .with_param(
                    ParamSpec::optional("questions", ParamType::String)
                        .describe("Specific questions to answer"),
                )
                .with_param(text(
                    "visualization_needed",
                    "true",
                    "Ask for visualizations (true/false)",
                ))
                .with_param(text(
                    "output_format",
                    "report",
                    "report, summary, detailed or presentation",
                )),
            prompt("problem_solving", footer, problem_solving)
                .with_title("Problem Solving")
                .with_description("Generate a structured problem-solving prompt.")
                .with_param(
                    ParamSpec::required("problem_statement", ParamType::String)
                        .describe("Description of the problem"),
                )
                .with_param(text(
                    "domain",
                    "general",
                    "general, technical, business, creative or academic",
                ))
                .with_param(
                    ParamSpec::optional("constraints", ParamType::String)
                        .describe("Constraints or limitations"),
                )
                .with_param(text(
                    "solution_type",
                    "step_by_step",
                    "step_by_step, creative, analytical or practical",
                ))
                .with_param(text(
                    "creativity_level",
                    "balanced",
                    "conservative, balanced or innovative",
                )),
            prompt("generate_tests", footer, generate_tests)
                .with_title("Test Generator")
                .with_description("Generate a prompt asking for test cases for a piece of code.")
                .with_param(ParamSpec::required("code", ParamType::String).describe("Code to test"))
                .with_param(text(
                    "test_type",
                    "unit",
                    "unit, integration, end_to_end or performance",
                ))
                .with_param(text("framework", "pytest", "Testing framework"))
                .with_param(text(
                    "coverage_level",
                    "comprehensive",
                    "basic, comprehensive or exhaustive",
                ))
                .with_param(text(
                    "include_edge_cases",
                    "true",
                    "Include edge cases (true/false)",
                )),
        ])
    }
}

fn arg<'a>(args: &'a Arguments, name: &str, fallback: &'a str) -> &'a str {
    args.str(name).unwrap_or(fallback)
}

fn flag(args: &Arguments, name: &str) -> bool {
    !matches!(
        args.str(name).map(str::to_ascii_lowercase).as_deref(),
        Some("false" | "no" | "0")
    )
}

fn title_case(s: &str) -> String {
    s.split(['_', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn code_review(args: &Arguments) -> (String, String) {
    let code = arg(args, "code", "");
    let language = arg(args, "language", "python");
    let focus = arg(args, "focus_areas", "all");
    let severity = arg(args, "severity_level", "standard");

    let focus_text = match focus {
        "all" => "all aspects including security, performance, style, maintainability and potential bugs",
        "security" => "security vulnerabilities, input validation, authentication and authorization",
        "performance" => "performance bottlenecks, optimization opportunities and scalability",
        "style" => "code style, formatting, naming conventions and readability",
        "bugs" => "potential bugs, error handling and edge cases",
        other => other,
    };
    let severity_text = match severity {
        "lenient" => "Focus on critical issues only. Be encouraging and highlight good practices.",
        "strict" => "Be thorough and meticulous. Flag even minor issues and suggest best practices.",
        _ => "Provide balanced feedback covering important issues and improvements.",
    };

    let body = format!(
        "# Code Review Request\n\n\
         **Language:** {language}\n\
         **Focus Areas:** {focus_text}\n\
         **Review Level:** {}\n\n\
         ```{language}\n{code}\n```\n\n\
         ## Review Instructions\n{severity_text}\n\n\
         Please cover:\n\
         1. Overall assessment of quality, structure and maintainability\n\
         2. Specific issues: security, performance, bugs, style\n\
         3. Concrete recommendations with examples\n\
         4. Positive aspects worth keeping\n\n\
         Rate each issue as Critical (must fix), Important (should fix) or Minor (nice to fix).",
        title_case(severity)
    );
    (format!("Code Review: {} Code", title_case(language)), body)
}

fn documentation(args: &Arguments) -> (String, String) {
    let code = arg(args, "code", "");
    let doc_type = arg(args, "doc_type", "api");
    let format_type = arg(args, "format_type", "markdown");
    let audience = arg(args, "target_audience", "developers");
    let examples = flag(args, "include_examples");

    let kind = match doc_type {
        "api" => "API reference documentation with parameters, return values and errors",
        "user_guide" => "a user-friendly guide with step-by-step instructions and common use cases",
        "technical" => "technical documentation covering architecture and implementation details",
        "readme" => "a README with overview, installation, usage and contribution guidelines",
        other => other,
    };

    let mut body = format!(
        "# Documentation Generation Request\n\n\
         **Documentation Type:** {}\n\
         **Format:** {}\n\
         **Target Audience:** {}\n\
         **Include Examples:** {}\n\n\
         ```\n{code}\n```\n\n\
         Create {kind}.\n\n\
         Structure:\n\
         1. Overview: purpose and key features\n\
         2. Setup: prerequisites, installation, configuration\n\
         3. Usage: getting started, core functionality, advanced features\n\
         4. Reference: parameters, outputs, error handling\n",
        title_case(doc_type),
        format_type.to_uppercase(),
        title_case(audience),
        if examples { "Yes" } else { "No" },
    );
    if examples {
        body.push_str(
            "5. Examples: basic usage, common use cases, error handling\n",
        );
    }
    (format!("Documentation: {}", title_case(doc_type)), body)
}

fn analyze_data(args: &Arguments) -> (String, String) {
    let description = arg(args, "data_description", "");
    let analysis = arg(args, "analysis_type", "exploratory");
    let output_format = arg(args, "output_format", "report");
    let visualize = flag(args, "visualization_needed");

    let approach = match analysis {
        "exploratory" => "a comprehensive exploration of patterns, distributions and relationships",
        "statistical" => "statistical analysis with hypothesis tests and confidence intervals",
        "predictive" => "predictive modeling with model evaluation and validation",
        "comparative" => "comparative analysis between groups, time periods or conditions",
        other => other,
    };

    let mut body = format!(
        "# Data Analysis Request\n\n## Data Overview\n{description}\n\n\
         **Type:** {} Analysis\n\
         **Output Format:** {}\n\
         **Visualizations:** {}\n\n",
        title_case(analysis),
        title_case(output_format),
        if visualize { "Required" } else { "Not required" },
    );
    match args.str("questions") {
        Some(questions) => {
            let _ = write!(body, "## Questions to Address\n{questions}\n\n");
        }
        None => body.push_str(
            "## Focus Areas\n- Data quality and completeness\n- Key patterns and trends\n\
             - Outliers and anomalies\n- Relationships between variables\n\n",
        ),
    }
    let _ = write!(
        body,
        "Please provide {approach}, covering data understanding, preparation, method, \
         key findings, recommendations and a conclusion."
    );
    if visualize {
        body.push_str("\nInclude appropriate charts with clear labels and legends.");
    }
    (format!("Data Analysis: {}", title_case(analysis)), body)
}

fn problem_solving(args: &Arguments) -> (String, String) {
    let problem = arg(args, "problem_statement", "");
    let domain = arg(args, "domain", "general");
    let solution_type = arg(args, "solution_type", "step_by_step");
    let creativity = arg(args, "creativity_level", "balanced");

    let approach = match solution_type {
        "step_by_step" => "systematic, methodical approach with clear steps",
        "creative" => "innovative thinking with several creative options",
        "analytical" => "data-driven, logical analysis with evidence-based recommendations",
        "practical" => "hands-on, implementable solutions focused on feasibility",
        other => other,
    };
    let creativity_text = match creativity {
        "conservative" => "Focus on proven, low-risk solutions.",
        "innovative" => "Encourage unconventional solutions and breakthrough thinking.",
        _ => "Combine proven methods with some innovative approaches.",
    };

    let mut body = format!(
        "# Problem-Solving Request\n\n## Problem Statement\n{problem}\n\n\
         **Domain:** {}\n\
         **Approach:** {approach}\n\
         **Creativity:** {creativity_text}\n\n",
        title_case(domain),
    );
    if let Some(constraints) = args.str("constraints") {
        let _ = write!(body, "## Constraints\n{constraints}\n\n");
    }
    body.push_str(
        "Structure the answer as: problem analysis, information needed, solution options \
         with trade-offs, evaluation criteria, recommended solution with an implementation \
         plan, and next steps.",
    );
    (format!("Problem Solving: {} Domain", title_case(domain)), body)
}

fn generate_tests(args: &Arguments) -> (String, String) {
    let code = arg(args, "code", "");
    let test_type = arg(args, "test_type", "unit");
    let framework = arg(args, "framework", "pytest");
    let coverage = arg(args, "coverage_level", "comprehensive");
    let edge_cases = flag(args, "include_edge_cases");

    let mut body = format!(
        "# Test Generation Request\n\n\
         **Test Type:** {}\n\
         **Framework:** {framework}\n\
         **Coverage Level:** {}\n\n\
         ```\n{code}\n```\n\n\
         Write {test_type} tests using {framework}. Cover the main success paths, \
         error handling and input validation.",
        title_case(test_type),
        title_case(coverage),
    );
    if edge_cases {
        body.push_str(" Include edge cases: empty inputs, boundary values and invalid types.");
    }
    (format!("Tests: {} ({framework})", title_case(test_type)), body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::schema;

    fn render(name: &str, supplied: Value) -> (Option<String>, String) {
        let provider = PromptsProvider::default();
        let descriptors = provider.descriptors().unwrap();
        let descriptor = descriptors.iter().find(|d| d.name() == name).unwrap();
        let args = schema::validate(descriptor.params(), Some(&supplied)).unwrap();
        let result = tokio_test::block_on(descriptor.handler().invoke(args));
        match result {
            InvocationResult::Success(Output::Prompt {
                description,
                mut messages,
            }) => (description, messages.remove(0).text),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn code_review_uses_defaults() {
        let (title, body) = render("code_review", json!({"code": "print(1)"}));
        assert_eq!(title.as_deref(), Some("Code Review: Python Code"));
        assert!(body.contains("```python\nprint(1)\n```"));
        assert!(body.contains("**Review Level:** Standard"));
    }

    #[test]
    fn documentation_examples_flag() {
        let (_, with) = render("generate_documentation", json!({"code": "fn f() {}"}));
        let (_, without) = render(
            "generate_documentation",
            json!({"code": "fn f() {}", "include_examples": "false"}),
        );
        assert!(with.contains("Examples:"));
        assert!(!without.contains("Examples:"));
    }

    #[test]
    fn optional_sections_appear_when_given() {
        let (_, body) = render(
            "problem_solving",
            json!({"problem_statement": "Too slow", "constraints": "No new hardware"}),
        );
        assert!(body.contains("## Constraints\nNo new hardware"));

        let (_, body) = render("analyze_data", json!({"data_description": "sales.csv"}));
        assert!(body.contains("## Focus Areas"));
    }

    #[test]
    fn footer_is_appended() {
        let mut opts = Map::new();
        opts.insert("footer".into(), json!("Answer in English."));
        let provider = PromptsProvider::from_options(&opts).unwrap();
        let descriptors = provider.descriptors().unwrap();
        let d = descriptors.iter().find(|d| d.name() == "generate_tests").unwrap();
        let args = schema::validate(d.params(), Some(&json!({"code": "x"}))).unwrap();
        let InvocationResult::Success(Output::Prompt { messages, .. }) =
            tokio_test::block_on(d.handler().invoke(args))
        else {
            panic!("expected prompt");
        };
        assert!(messages[0].text.ends_with("Answer in English."));
    }

    #[test]
    fn title_case_words() {
        assert_eq!(title_case("user_guide"), "User Guide");
        assert_eq!(title_case("end_to_end"), "End To End");
    }
}
