//! Command helpers on [`ConnectionManager`].
//!
//! Each helper builds a [`Command`] and hands it to
//! [`ConnectionManager::send`]; they add no behaviour of their own.

use crate::command::{Command, TrajPoint};
use crate::error::SendError;
use crate::manager::ConnectionManager;

impl ConnectionManager {
    /// Joint velocities for the controller subscribed under `name`.
    pub async fn send_velocity(&self, values: Vec<f64>, name: &str) -> Result<(), SendError> {
        self.send(&Command::Velocity {
            values,
            name: name.to_string(),
        })
        .await
    }

    pub async fn send_position(&self, values: Vec<f64>, name: &str) -> Result<(), SendError> {
        self.send(&Command::Position {
            values,
            name: name.to_string(),
        })
        .await
    }

    pub async fn send_effort(&self, values: Vec<f64>, name: &str) -> Result<(), SendError> {
        self.send(&Command::Effort {
            values,
            name: name.to_string(),
        })
        .await
    }

    /// An ordered list of trajectory points; each point carries its own
    /// time-from-start.
    pub async fn send_trajectory(
        &self,
        points: Vec<TrajPoint>,
        name: &str,
    ) -> Result<(), SendError> {
        self.send(&Command::Trajectory {
            points,
            name: name.to_string(),
        })
        .await
    }

    /// Joypad buttons and axes, always published as `joypad`.
    pub async fn send_joypad(&self, buttons: Vec<i32>, axes: Vec<f64>) -> Result<(), SendError> {
        self.send(&Command::Joypad { buttons, axes }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn helpers_require_a_connection() {
        let manager = ConnectionManager::new();
        assert!(matches!(
            manager.send_velocity(vec![1.0, 2.0, 3.0], "velocity_publisher").await,
            Err(SendError::NotConnected)
        ));
        assert!(matches!(
            manager
                .send_trajectory(vec![TrajPoint::new(vec![0.0], vec![0.0], vec![0.0])], "traj")
                .await,
            Err(SendError::NotConnected)
        ));
        assert!(matches!(
            manager.send_joypad(vec![], vec![]).await,
            Err(SendError::NotConnected)
        ));
    }
}
