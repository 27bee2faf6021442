/*!
Academic offerings that Student profiles point at.
*/
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Course {
    pub id: i64,
    /// Short unique symbol, like "CS101".
    pub code: String,
    pub name: String,
}
