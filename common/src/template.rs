use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum TemplateError {
    #[error("missing template parameter: {0}")]
    MissingParam(String),
}

/// Substitute `{{name}}` placeholders in a prompt template. Every placeholder
/// must be covered by `params`; a leftover placeholder after substitution is
/// an error rather than a half-filled prompt reaching the model.
pub fn fill(template: &str, params: &[(&str, &str)]) -> Result<String, TemplateError> {
    let mut prompt = template.to_string();
    for (name, value) in params {
        prompt = prompt.replace(&format!("{{{{{}}}}}", name), value);
    }
    if let Some(missing) = leftover_placeholder(&prompt) {
        return Err(TemplateError::MissingParam(missing));
    }
    Ok(prompt)
}

fn leftover_placeholder(prompt: &str) -> Option<String> {
    let start = prompt.find("{{")?;
    let end = prompt[start + 2..].find("}}")? + start + 2;
    Some(prompt[start + 2..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_every_placeholder() {
        let prompt = fill(
            "Research {{sector}} and identify {{limit}} coins.",
            &[("sector", "defi"), ("limit", "3")],
        )
        .unwrap();
        assert_eq!(prompt, "Research defi and identify 3 coins.");
    }

    #[test]
    fn repeated_placeholders_are_all_replaced() {
        let prompt = fill("{{coin}} then {{coin}} again", &[("coin", "BTC")]).unwrap();
        assert_eq!(prompt, "BTC then BTC again");
    }

    #[test]
    fn unfilled_placeholder_is_an_error() {
        let err = fill("Bias is {{bias}}, sector {{sector}}", &[("bias", "long")]).unwrap_err();
        assert_eq!(err, TemplateError::MissingParam("sector".to_string()));
    }
}
