//! Typed environments and their name-keyed forwarding adapter.

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::HandleError;
use super::space::Space;
use super::SimulationHandle;
use crate::worker::protocol::{attributes, methods};

/// Outcome of one environment step.
///
/// Crosses the channel as a named object rather than a positional
/// `(observation, reward, done, info)` tuple, with `reward` always a float:
/// `{"observation":3,"reward":3.0,"done":false,"info":{}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step<O = Value> {
    pub observation: O,
    pub reward: f64,
    pub done: bool,
    #[serde(default)]
    pub info: Map<String, Value>,
}

impl<O> Step<O> {
    pub fn new(observation: O, reward: f64, done: bool) -> Self {
        Self {
            observation,
            reward,
            done,
            info: Map::new(),
        }
    }
}

/// The uniform reset/step contract simulators are adapted to.
pub trait Environment: Send {
    type Observation: Serialize;
    type Action: DeserializeOwned;

    fn observation_space(&self) -> Space;

    fn action_space(&self) -> Space;

    fn reset(&mut self) -> anyhow::Result<Self::Observation>;

    fn step(&mut self, action: Self::Action) -> anyhow::Result<Step<Self::Observation>>;

    /// Environments without a renderer keep the default, which raises.
    fn render(&mut self) -> anyhow::Result<Value> {
        Err(HandleError::UnknownMethod(methods::RENDER.to_string()).into())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Exposes an [`Environment`] through the [`SimulationHandle`] dispatch table.
///
/// Forwarded attributes: `observation_space`, `action_space`.
/// Forwarded methods: `reset()`, `step(action)`, `render()`, `close()`.
pub struct EnvHandle<E> {
    env: E,
}

impl<E: Environment> EnvHandle<E> {
    pub fn new(env: E) -> Self {
        Self { env }
    }

    pub fn get_ref(&self) -> &E {
        &self.env
    }

    pub fn into_inner(self) -> E {
        self.env
    }
}

impl<E: Environment> SimulationHandle for EnvHandle<E> {
    fn attribute(&self, name: &str) -> anyhow::Result<Value> {
        let space = match name {
            attributes::OBSERVATION_SPACE => self.env.observation_space(),
            attributes::ACTION_SPACE => self.env.action_space(),
            other => return Err(HandleError::UnknownAttribute(other.to_string()).into()),
        };
        Ok(serde_json::to_value(space)?)
    }

    fn call(
        &mut self,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> anyhow::Result<Value> {
        match method {
            methods::RESET => {
                expect_no_arguments(method, &args, &kwargs)?;
                let observation = self.env.reset()?;
                Ok(serde_json::to_value(observation)?)
            }
            methods::STEP => {
                let raw = single_argument(method, "action", args, kwargs)?;
                let action: E::Action = serde_json::from_value(raw)
                    .with_context(|| format!("action does not fit `{}`", method))?;
                let step = self.env.step(action)?;
                Ok(serde_json::to_value(step)?)
            }
            methods::RENDER => {
                expect_no_arguments(method, &args, &kwargs)?;
                self.env.render()
            }
            methods::CLOSE => {
                expect_no_arguments(method, &args, &kwargs)?;
                self.env.close()?;
                Ok(Value::Null)
            }
            other => Err(HandleError::UnknownMethod(other.to_string()).into()),
        }
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.env.close()
    }
}

fn expect_no_arguments(
    method: &str,
    args: &[Value],
    kwargs: &Map<String, Value>,
) -> Result<(), HandleError> {
    if args.is_empty() && kwargs.is_empty() {
        Ok(())
    } else {
        Err(HandleError::invalid_arguments(
            method,
            format!(
                "takes no arguments ({} positional, {} keyword given)",
                args.len(),
                kwargs.len()
            ),
        ))
    }
}

/// Extract one argument given either positionally or by keyword.
fn single_argument(
    method: &str,
    keyword: &str,
    mut args: Vec<Value>,
    mut kwargs: Map<String, Value>,
) -> Result<Value, HandleError> {
    let by_keyword = kwargs.remove(keyword);
    if !kwargs.is_empty() {
        let names: Vec<&str> = kwargs.keys().map(String::as_str).collect();
        return Err(HandleError::invalid_arguments(
            method,
            format!("unexpected keyword arguments: {}", names.join(", ")),
        ));
    }
    let given = args.len() + usize::from(by_keyword.is_some());
    match (given, by_keyword) {
        (1, Some(value)) => Ok(value),
        (1, None) => Ok(args.remove(0)),
        (0, _) => Err(HandleError::invalid_arguments(
            method,
            format!("missing required argument `{}`", keyword),
        )),
        (n, _) => Err(HandleError::invalid_arguments(
            method,
            format!("expected exactly one `{}`, got {} values", keyword, n),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::DType;
    use serde_json::json;

    struct Echo {
        last: Option<f64>,
    }

    impl Environment for Echo {
        type Observation = Option<f64>;
        type Action = f64;

        fn observation_space(&self) -> Space {
            Space::uniform(-1.0, 1.0, &[1], DType::Float64)
        }

        fn action_space(&self) -> Space {
            Space::uniform(-1.0, 1.0, &[1], DType::Float64)
        }

        fn reset(&mut self) -> anyhow::Result<Option<f64>> {
            self.last = None;
            Ok(None)
        }

        fn step(&mut self, action: f64) -> anyhow::Result<Step<Option<f64>>> {
            self.last = Some(action);
            Ok(Step::new(Some(action), action, false))
        }
    }

    fn handle() -> EnvHandle<Echo> {
        EnvHandle::new(Echo { last: None })
    }

    #[test]
    fn test_step_wire_shape() {
        insta::assert_snapshot!(
            serde_json::to_string(&Step::new(3, 3.0, false)).unwrap(),
            @r#"{"observation":3,"reward":3.0,"done":false,"info":{}}"#
        );
    }

    #[test]
    fn test_attributes_forwarded() {
        let h = handle();
        let space: Space = serde_json::from_value(h.attribute("action_space").unwrap()).unwrap();
        assert_eq!(space.flat_len(), Some(1));
        assert!(h.attribute("observation_space").is_ok());
    }

    #[test]
    fn test_unknown_attribute() {
        let err = handle().attribute("physics").unwrap_err();
        assert!(err.to_string().contains("no attribute named `physics`"));
    }

    #[test]
    fn test_step_positional_and_keyword() {
        let mut h = handle();
        let value = h.call("step", vec![json!(0.5)], Map::new()).unwrap();
        let step: Step<Option<f64>> = serde_json::from_value(value).unwrap();
        assert_eq!(step.observation, Some(0.5));
        assert_eq!(step.reward, 0.5);

        let mut kwargs = Map::new();
        kwargs.insert("action".to_string(), json!(-0.25));
        let value = h.call("step", vec![], kwargs).unwrap();
        assert_eq!(value["observation"], json!(-0.25));
        assert_eq!(h.get_ref().last, Some(-0.25));
    }

    #[test]
    fn test_step_argument_errors() {
        let mut h = handle();
        let missing = h.call("step", vec![], Map::new()).unwrap_err();
        assert!(missing.to_string().contains("missing required argument `action`"));

        let too_many = h.call("step", vec![json!(1.0), json!(2.0)], Map::new()).unwrap_err();
        assert!(too_many.to_string().contains("expected exactly one"));

        let wrong_type = h.call("step", vec![json!("left")], Map::new()).unwrap_err();
        assert!(format!("{:?}", wrong_type).contains("action does not fit `step`"));
    }

    #[test]
    fn test_reset_rejects_arguments() {
        let mut h = handle();
        assert!(h.call("reset", vec![json!(1)], Map::new()).is_err());
        assert_eq!(h.call("reset", vec![], Map::new()).unwrap(), Value::Null);
    }

    #[test]
    fn test_render_default_raises() {
        let err = handle().call("render", vec![], Map::new()).unwrap_err();
        assert!(err.to_string().contains("no method named `render`"));
    }

    #[test]
    fn test_unknown_method() {
        let err = handle().call("apply_dr", vec![], Map::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HandleError>(),
            Some(HandleError::UnknownMethod(name)) if name == "apply_dr"
        ));
    }
}
