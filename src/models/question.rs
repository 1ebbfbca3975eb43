// src/models/question.rs

use serde::{Deserialize, Serialize};

use super::session::GroupId;

/// A diagnostic parameter displayed alongside a case (e.g. a measured angle).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub reference_values: Option<String>,
}

/// Values of one parameter for one case.
/// `value3` is the reference measurement that gives away the correct option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterValue {
    pub parameter_id: i64,
    pub value1: f64,
    pub value2: f64,
    pub value3: f64,
}

/// The patient case a question is built around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub id: i64,
    pub code: String,
    pub gender: String,
    pub age1: i32,
    pub age2: i32,
    pub image1: Option<String>,
    pub image2: Option<String>,
    pub parameters: Vec<Parameter>,
    pub parameter_values: Vec<ParameterValue>,
}

/// Reference data for one question, including the server-side answer key.
/// Never serialized to examinees; see [`PublicQuestion`].
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub id: i64,
    pub group: GroupId,

    /// The text content of the question.
    pub question: String,

    /// Option labels in display order.
    pub options: Vec<String>,

    /// Label of the correct option.
    pub correct_option: String,

    pub prediction_age: i32,
    pub case: Case,
}

/// Parameter value as shown to the examinee: the reference value is left out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicParameterValue {
    pub parameter_id: i64,
    pub value1: f64,
    pub value2: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicCase {
    pub id: i64,
    pub code: String,
    pub gender: String,
    pub age1: i32,
    pub age2: i32,
    pub image1: Option<String>,
    pub image2: Option<String>,
    pub parameters: Vec<Parameter>,
    pub parameters_values: Vec<PublicParameterValue>,
}

/// DTO for sending a question to the client (no answer key, no reference values).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicQuestion {
    pub id: i64,
    pub question: String,
    pub options: Vec<String>,
    pub prediction_age: i32,
    pub case: PublicCase,
}

impl From<Question> for PublicQuestion {
    fn from(q: Question) -> Self {
        let case = q.case;
        PublicQuestion {
            id: q.id,
            question: q.question,
            options: q.options,
            prediction_age: q.prediction_age,
            case: PublicCase {
                id: case.id,
                code: case.code,
                gender: case.gender,
                age1: case.age1,
                age2: case.age2,
                image1: case.image1,
                image2: case.image2,
                parameters: case.parameters,
                parameters_values: case
                    .parameter_values
                    .into_iter()
                    .map(|pv| PublicParameterValue {
                        parameter_id: pv.parameter_id,
                        value1: pv.value1,
                        value2: pv.value2,
                    })
                    .collect(),
            },
        }
    }
}
