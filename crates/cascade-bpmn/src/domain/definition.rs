use crate::domain::element_instance::{ElementId, ElementType, ProcessId};
use crate::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A process definition as submitted for deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDefinition {
    /// BPMN process ID
    pub id: ProcessId,

    /// The definition version
    #[serde(default = "default_version")]
    pub version: String,

    /// Human-readable name
    #[serde(default)]
    pub name: Option<String>,

    /// Element entered when an instance is activated
    pub start_element: String,

    /// The elements of the process
    pub elements: Vec<ElementDefinition>,
}

fn default_version() -> String {
    "1".to_string()
}

/// An element of a process definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementDefinition {
    /// A task completed by an external worker
    ServiceTask(ServiceTaskDefinition),
    /// An activity executed once per item of a collection
    MultiInstance(MultiInstanceDefinition),
}

impl ElementDefinition {
    /// ID of the element
    pub fn id(&self) -> &str {
        match self {
            ElementDefinition::ServiceTask(task) => &task.id,
            ElementDefinition::MultiInstance(body) => &body.id,
        }
    }
}

/// Service task definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceTaskDefinition {
    /// ID of the task
    pub id: String,

    /// Job type picked up by workers
    #[serde(default)]
    pub task_type: Option<String>,
}

/// Multi-instance activity definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiInstanceDefinition {
    /// ID shared by the body and its inner activity
    pub id: String,

    /// The activity executed per item
    #[serde(default)]
    pub inner_activity: Option<Box<ElementDefinition>>,

    /// How the body iterates
    pub loop_characteristics: LoopCharacteristics,

    /// Events attached to the body
    #[serde(default)]
    pub boundary_events: Vec<BoundaryEventDefinition>,
}

/// Loop characteristics of a multi-instance body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopCharacteristics {
    /// One child at a time instead of all at once
    #[serde(default)]
    pub is_sequential: bool,

    /// Expression yielding the array to iterate
    pub input_collection: String,

    /// Variable holding the current item in each child
    #[serde(default)]
    pub input_element: Option<String>,

    /// Variable collecting one result per child
    #[serde(default)]
    pub output_collection: Option<String>,

    /// Expression evaluated in a completed child to produce its result
    #[serde(default)]
    pub output_element: Option<String>,
}

/// Catch event attached to an activity boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryEventDefinition {
    /// ID of the boundary event
    pub id: String,

    /// Name of the message or signal caught
    pub event_name: String,

    /// Whether the event cancels the activity
    #[serde(default = "default_interrupting")]
    pub interrupting: bool,
}

fn default_interrupting() -> bool {
    true
}

impl ProcessDefinition {
    /// Validate the process definition
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.elements.is_empty() {
            return Err(EngineError::ValidationError(
                "Process must have at least one element".to_string(),
            ));
        }

        let mut element_ids = HashSet::new();
        for element in &self.elements {
            if element.id() == self.id.as_str() {
                return Err(EngineError::ValidationError(format!(
                    "Element ID {} collides with the process ID",
                    element.id()
                )));
            }
            if !element_ids.insert(element.id()) {
                return Err(EngineError::ValidationError(format!(
                    "Duplicate element ID: {}",
                    element.id()
                )));
            }
        }

        if !element_ids.contains(self.start_element.as_str()) {
            return Err(EngineError::ValidationError(format!(
                "Start element {} does not exist",
                self.start_element
            )));
        }

        for element in &self.elements {
            if let ElementDefinition::MultiInstance(body) = element {
                body.validate()?;
            }
        }

        Ok(())
    }
}

impl MultiInstanceDefinition {
    fn validate(&self) -> Result<(), EngineError> {
        match self.inner_activity.as_deref() {
            None => {
                return Err(EngineError::ValidationError(format!(
                    "Multi-instance body {} has no inner activity",
                    self.id
                )))
            }
            Some(ElementDefinition::MultiInstance(_)) => {
                return Err(EngineError::ValidationError(format!(
                    "Multi-instance body {} cannot wrap another multi-instance body",
                    self.id
                )))
            }
            Some(ElementDefinition::ServiceTask(task)) if task.id != self.id => {
                return Err(EngineError::ValidationError(format!(
                    "Inner activity {} must share the ID of its body {}",
                    task.id, self.id
                )))
            }
            Some(ElementDefinition::ServiceTask(_)) => {}
        }

        let lc = &self.loop_characteristics;
        if lc.input_collection.trim().is_empty() {
            return Err(EngineError::ValidationError(format!(
                "Multi-instance body {} has an empty input collection",
                self.id
            )));
        }
        if lc.output_collection.is_some() != lc.output_element.is_some() {
            return Err(EngineError::ValidationError(format!(
                "Multi-instance body {} must declare output collection and output element together",
                self.id
            )));
        }

        let mut event_ids = HashSet::new();
        for event in &self.boundary_events {
            if !event_ids.insert(event.id.as_str()) {
                return Err(EngineError::ValidationError(format!(
                    "Duplicate boundary event ID {} on {}",
                    event.id, self.id
                )));
            }
        }

        Ok(())
    }
}

/// The inner activity executed by each child of a body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableActivity {
    /// ID of the activity, shared with its body
    pub id: ElementId,
    /// Job type picked up by workers
    pub task_type: Option<String>,
}

/// Deployed form of a multi-instance body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableMultiInstanceBody {
    /// ID of the body
    pub id: ElementId,
    /// The activity run by each child
    pub inner_activity: Option<ExecutableActivity>,
    /// How the body iterates
    pub loop_characteristics: LoopCharacteristics,
    /// Events attached to the body
    pub boundary_events: Vec<BoundaryEventDefinition>,
}

/// Deployed element, looked up by element ID when an event is processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutableElement {
    /// The process itself
    Process(ElementId),
    /// A plain activity
    Activity(ExecutableActivity),
    /// A multi-instance body
    MultiInstanceBody(ExecutableMultiInstanceBody),
}

impl ExecutableElement {
    /// ID of the element
    pub fn id(&self) -> &ElementId {
        match self {
            ExecutableElement::Process(id) => id,
            ExecutableElement::Activity(activity) => &activity.id,
            ExecutableElement::MultiInstanceBody(body) => &body.id,
        }
    }

    /// Type of instances created for this element
    pub fn element_type(&self) -> ElementType {
        match self {
            ExecutableElement::Process(_) => ElementType::Process,
            ExecutableElement::Activity(_) => ElementType::ServiceTask,
            ExecutableElement::MultiInstanceBody(_) => ElementType::MultiInstanceBody,
        }
    }
}

/// A validated process ready to be instantiated
#[derive(Debug, Clone)]
pub struct DeployedProcess {
    /// BPMN process ID
    pub process_id: ProcessId,
    /// Definition version
    pub version: String,
    /// Element entered on activation
    pub start_element: ElementId,
    /// All elements by ID, the process itself included
    pub elements: HashMap<ElementId, ExecutableElement>,
}

impl DeployedProcess {
    /// Look up an element of this process
    pub fn element(&self, element_id: &ElementId) -> Result<&ExecutableElement, EngineError> {
        self.elements
            .get(element_id)
            .ok_or_else(|| EngineError::ElementNotFound {
                process_id: self.process_id.to_string(),
                element_id: element_id.to_string(),
            })
    }
}

impl TryFrom<ProcessDefinition> for DeployedProcess {
    type Error = EngineError;

    fn try_from(definition: ProcessDefinition) -> Result<Self, Self::Error> {
        definition.validate()?;

        let process_element = ElementId::new(definition.id.as_str());
        let mut elements = HashMap::new();
        elements.insert(
            process_element.clone(),
            ExecutableElement::Process(process_element),
        );

        for element in definition.elements {
            let executable = match element {
                ElementDefinition::ServiceTask(task) => {
                    ExecutableElement::Activity(ExecutableActivity {
                        id: ElementId::new(task.id),
                        task_type: task.task_type,
                    })
                }
                ElementDefinition::MultiInstance(body) => {
                    let inner_activity = match body.inner_activity.map(|inner| *inner) {
                        Some(ElementDefinition::ServiceTask(task)) => Some(ExecutableActivity {
                            id: ElementId::new(task.id),
                            task_type: task.task_type,
                        }),
                        _ => None,
                    };
                    ExecutableElement::MultiInstanceBody(ExecutableMultiInstanceBody {
                        id: ElementId::new(body.id),
                        inner_activity,
                        loop_characteristics: body.loop_characteristics,
                        boundary_events: body.boundary_events,
                    })
                }
            };
            elements.insert(executable.id().clone(), executable);
        }

        Ok(Self {
            process_id: definition.id,
            version: definition.version,
            start_element: ElementId::new(definition.start_element),
            elements,
        })
    }
}
