//! TextFSM-style template engine.
//!
//! Supports the subset needed for tabular device output:
//!
//! ```text
//! Value Required VLAN_ID (\d+)
//! Value NAME (\S+)
//!
//! Start
//!   ^${VLAN_ID}\s+${NAME} -> Record
//!   ^\s*$$
//!   ^. -> Error "unexpected line"
//! ```
//!
//! Value options: `Required`, `Filldown`. Line ops: `Next`, `Continue`.
//! Record ops: `Record`, `NoRecord`, `Clear`, `Clearall`. A rule may name a
//! new state; `End` stops processing. Unless an explicit `EOF` state is
//! declared, the pending row is recorded at end of input.

use regex::Regex;

use super::ParseError;

/// A parsed row, one entry per declared value in declaration order.
pub type Row = Vec<String>;

#[derive(Debug, Clone)]
struct ValueDef {
    name: String,
    regex: String,
    required: bool,
    filldown: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineOp {
    Next,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOp {
    NoRecord,
    Record,
    Clear,
    ClearAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    State(usize),
    End,
}

#[derive(Debug, Clone)]
enum Action {
    Proceed {
        line_op: LineOp,
        record_op: RecordOp,
        transition: Option<Transition>,
    },
    Error(String),
}

#[derive(Debug)]
struct Rule {
    regex: Regex,
    /// (value slot, capture group name)
    captures: Vec<(usize, String)>,
    action: Action,
}

#[derive(Debug)]
struct State {
    name: String,
    rules: Vec<Rule>,
}

/// Rule as read from the template, before state names are resolved.
struct RawRule {
    line: usize,
    pattern: String,
    line_op: LineOp,
    record_op: RecordOp,
    new_state: Option<String>,
    error: Option<String>,
}

/// Compiled template.
#[derive(Debug)]
pub struct Template {
    values: Vec<ValueDef>,
    states: Vec<State>,
    start: usize,
    explicit_eof: bool,
}

impl Template {
    /// Compile template text.
    pub fn compile(text: &str) -> Result<Self, ParseError> {
        let mut lines = text.lines().enumerate().map(|(idx, line)| (idx + 1, line));

        // Value definitions run until the first blank line.
        let mut values: Vec<ValueDef> = Vec::new();
        for (no, line) in lines.by_ref() {
            let trimmed = line.trim();
            if trimmed.starts_with('#') {
                continue;
            }
            if trimmed.is_empty() {
                if values.is_empty() {
                    continue;
                }
                break;
            }
            let value = parse_value(no, trimmed)?;
            if values.iter().any(|v| v.name == value.name) {
                return Err(template_error(no, format!("duplicate value {}", value.name)));
            }
            values.push(value);
        }
        if values.is_empty() {
            return Err(template_error(0, "no Value definitions"));
        }

        let mut raw_states: Vec<(String, Vec<RawRule>)> = Vec::new();
        for (no, line) in lines {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if !line.starts_with(char::is_whitespace) {
                if !is_identifier(trimmed) {
                    return Err(template_error(no, format!("invalid state name {:?}", trimmed)));
                }
                if raw_states.iter().any(|(name, _)| name == trimmed) {
                    return Err(template_error(no, format!("duplicate state {}", trimmed)));
                }
                raw_states.push((trimmed.to_string(), Vec::new()));
                continue;
            }
            let Some((_, rules)) = raw_states.last_mut() else {
                return Err(template_error(no, "rule outside of a state"));
            };
            rules.push(parse_rule(no, trimmed)?);
        }

        let state_names: Vec<String> = raw_states.iter().map(|(name, _)| name.clone()).collect();
        let start = state_names
            .iter()
            .position(|name| name == "Start")
            .ok_or_else(|| template_error(0, "missing Start state"))?;
        let explicit_eof = state_names.iter().any(|name| name == "EOF");

        let mut states = Vec::with_capacity(raw_states.len());
        for (name, raw_rules) in raw_states {
            let mut rules = Vec::with_capacity(raw_rules.len());
            for raw in raw_rules {
                rules.push(compile_rule(raw, &values, &state_names)?);
            }
            states.push(State { name, rules });
        }

        Ok(Self {
            values,
            states,
            start,
            explicit_eof,
        })
    }

    /// Position of a value in parsed rows.
    pub fn value_index(&self, name: &str) -> Option<usize> {
        self.values.iter().position(|v| v.name == name)
    }

    /// Run the state machine over `input`, returning the recorded rows.
    pub fn parse_text(&self, input: &str) -> Result<Vec<Row>, ParseError> {
        let mut rows = Vec::new();
        let mut current: Row = vec![String::new(); self.values.len()];
        let mut state = self.start;
        let mut ended = false;

        'lines: for (idx, line) in input.lines().enumerate() {
            for rule in &self.states[state].rules {
                let Some(caps) = rule.regex.captures(line) else {
                    continue;
                };
                for (slot, group) in &rule.captures {
                    if let Some(m) = caps.name(group) {
                        current[*slot] = m.as_str().to_string();
                    }
                }
                match &rule.action {
                    Action::Error(message) => {
                        return Err(ParseError::TemplateMismatch {
                            line: idx + 1,
                            text: line.to_string(),
                            message: message.clone(),
                        });
                    }
                    Action::Proceed {
                        line_op,
                        record_op,
                        transition,
                    } => {
                        self.apply(*record_op, &mut current, &mut rows);
                        match transition {
                            Some(Transition::End) => {
                                ended = true;
                                break 'lines;
                            }
                            Some(Transition::State(next)) => state = *next,
                            None => {}
                        }
                        if *line_op == LineOp::Next {
                            continue 'lines;
                        }
                    }
                }
            }
        }

        if !ended && !self.explicit_eof {
            self.apply(RecordOp::Record, &mut current, &mut rows);
        }

        tracing::trace!(
            rows = rows.len(),
            final_state = %self.states[state].name,
            "Template run finished"
        );
        Ok(rows)
    }

    fn apply(&self, op: RecordOp, current: &mut Row, rows: &mut Vec<Row>) {
        match op {
            RecordOp::NoRecord => {}
            RecordOp::Record => {
                let has_data = current.iter().any(|v| !v.is_empty());
                let complete = self
                    .values
                    .iter()
                    .zip(current.iter())
                    .all(|(def, v)| !def.required || !v.is_empty());
                if has_data && complete {
                    rows.push(current.clone());
                }
                self.clear(current, false);
            }
            RecordOp::Clear => self.clear(current, false),
            RecordOp::ClearAll => self.clear(current, true),
        }
    }

    fn clear(&self, current: &mut Row, all: bool) {
        for (def, v) in self.values.iter().zip(current.iter_mut()) {
            if all || !def.filldown {
                v.clear();
            }
        }
    }
}

fn template_error(line: usize, reason: impl Into<String>) -> ParseError {
    ParseError::Template {
        line,
        reason: reason.into(),
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `Value [Options] NAME (regex)`
fn parse_value(no: usize, line: &str) -> Result<ValueDef, ParseError> {
    let rest = line
        .strip_prefix("Value")
        .filter(|rest| rest.starts_with(char::is_whitespace))
        .ok_or_else(|| template_error(no, "expected Value definition"))?;
    let open = rest
        .find('(')
        .ok_or_else(|| template_error(no, "value regex must be enclosed in parentheses"))?;
    let (head, regex) = rest.split_at(open);
    let regex = regex.trim_end();
    if !regex.ends_with(')') {
        return Err(template_error(no, "value regex must be enclosed in parentheses"));
    }

    let tokens: Vec<&str> = head.split_whitespace().collect();
    let (options, name) = match tokens.as_slice() {
        [name] => ("", *name),
        [options, name] => (*options, *name),
        _ => return Err(template_error(no, "malformed Value definition")),
    };
    if !is_identifier(name) {
        return Err(template_error(no, format!("invalid value name {:?}", name)));
    }

    let mut value = ValueDef {
        name: name.to_string(),
        regex: regex.to_string(),
        required: false,
        filldown: false,
    };
    for option in options.split(',').filter(|o| !o.is_empty()) {
        match option {
            "Required" => value.required = true,
            "Filldown" => value.filldown = true,
            other => {
                return Err(template_error(no, format!("unsupported value option {}", other)));
            }
        }
    }
    Ok(value)
}

/// `^regex [-> [LineOp[.RecordOp]] [NewState]]` or `^regex -> Error ["message"]`
fn parse_rule(no: usize, line: &str) -> Result<RawRule, ParseError> {
    if !line.starts_with('^') {
        return Err(template_error(no, "rule must start with ^"));
    }

    let (pattern, action) = match line.rfind("->") {
        Some(pos) if line[..pos].ends_with(char::is_whitespace) => {
            (line[..pos].trim_end(), Some(line[pos + 2..].trim()))
        }
        _ => (line, None),
    };

    let mut rule = RawRule {
        line: no,
        pattern: pattern.to_string(),
        line_op: LineOp::Next,
        record_op: RecordOp::NoRecord,
        new_state: None,
        error: None,
    };
    let Some(action) = action else {
        return Ok(rule);
    };

    if let Some(message) = action.strip_prefix("Error") {
        let message = message.trim().trim_matches('"');
        rule.error = Some(if message.is_empty() {
            "no rule accepts this line".to_string()
        } else {
            message.to_string()
        });
        return Ok(rule);
    }

    let mut tokens = action.split_whitespace();
    let first = tokens
        .next()
        .ok_or_else(|| template_error(no, "empty action"))?;
    let new_state = match parse_ops(first) {
        Some((line_op, record_op)) => {
            rule.line_op = line_op;
            rule.record_op = record_op;
            tokens.next()
        }
        None => Some(first),
    };
    if tokens.next().is_some() {
        return Err(template_error(no, format!("malformed action {:?}", action)));
    }
    if new_state.is_some() && rule.line_op == LineOp::Continue {
        return Err(template_error(no, "Continue cannot change state"));
    }
    rule.new_state = new_state.map(str::to_string);
    Ok(rule)
}

fn parse_line_op(s: &str) -> Option<LineOp> {
    match s {
        "Next" => Some(LineOp::Next),
        "Continue" => Some(LineOp::Continue),
        _ => None,
    }
}

fn parse_record_op(s: &str) -> Option<RecordOp> {
    match s {
        "NoRecord" => Some(RecordOp::NoRecord),
        "Record" => Some(RecordOp::Record),
        "Clear" => Some(RecordOp::Clear),
        "Clearall" => Some(RecordOp::ClearAll),
        _ => None,
    }
}

fn parse_ops(token: &str) -> Option<(LineOp, RecordOp)> {
    match token.split_once('.') {
        Some((line, record)) => Some((parse_line_op(line)?, parse_record_op(record)?)),
        None => parse_line_op(token)
            .map(|op| (op, RecordOp::NoRecord))
            .or_else(|| parse_record_op(token).map(|op| (LineOp::Next, op))),
    }
}

fn compile_rule(raw: RawRule, values: &[ValueDef], states: &[String]) -> Result<Rule, ParseError> {
    let (expanded, captures) = expand_pattern(raw.line, &raw.pattern, values)?;
    let regex = Regex::new(&expanded)
        .map_err(|e| template_error(raw.line, format!("invalid rule regex: {}", e)))?;

    let action = match raw.error {
        Some(message) => Action::Error(message),
        None => {
            let transition = match raw.new_state.as_deref() {
                None => None,
                Some("End") => Some(Transition::End),
                Some(name) => Some(Transition::State(
                    states
                        .iter()
                        .position(|s| s == name)
                        .ok_or_else(|| template_error(raw.line, format!("unknown state {}", name)))?,
                )),
            };
            Action::Proceed {
                line_op: raw.line_op,
                record_op: raw.record_op,
                transition,
            }
        }
    };

    Ok(Rule {
        regex,
        captures,
        action,
    })
}

/// Substitute `${NAME}` with a named capture of the value regex and `$$` with `$`.
fn expand_pattern(
    no: usize,
    pattern: &str,
    values: &[ValueDef],
) -> Result<(String, Vec<(usize, String)>), ParseError> {
    let mut out = String::with_capacity(pattern.len());
    let mut captures = Vec::new();
    let mut rest = pattern;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("$$") {
            out.push('$');
            rest = after;
        } else if let Some(body) = tail.strip_prefix("${") {
            let end = body
                .find('}')
                .ok_or_else(|| template_error(no, "unterminated ${ in rule"))?;
            let name = &body[..end];
            let slot = values
                .iter()
                .position(|v| v.name == name)
                .ok_or_else(|| template_error(no, format!("unknown value {}", name)))?;
            out.push_str(&format!("(?P<{}>{})", name, values[slot].regex));
            captures.push((slot, name.to_string()));
            rest = &body[end + 1..];
        } else {
            out.push('$');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    Ok((out, captures))
}
