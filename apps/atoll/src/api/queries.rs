//! GraphQL documents for the platform API. The schema itself is an external
//! boundary; only the operations the CLI needs are spelled out here.

pub const TRIGGER_WP_COMMAND: &str = "\
mutation TriggerWpCommand($appId: ID!, $envId: ID!, $command: String!) {
  triggerWpCommand(input: { appId: $appId, envId: $envId, command: $command }) {
    commandId
    inputToken
  }
}";

pub const COMPLETED_COMMANDS: &str = "\
query CompletedCommands($appId: ID!, $limit: Int!) {
  app(id: $appId) {
    commands(status: COMPLETE, limit: $limit) {
      id
      command
      startedAt
    }
  }
}";

pub const APP_ENVIRONMENT: &str = "\
query AppEnvironment($app: String!, $env: String!) {
  app(name: $app) {
    id
    environment(name: $env) {
      id
      name
      isProduction
    }
  }
}";

pub const REQUEST_SQL_UPLOAD: &str = "\
mutation RequestSqlUpload($envId: ID!, $fileName: String!) {
  requestSqlUpload(input: { envId: $envId, fileName: $fileName }) {
    uploadUrl
  }
}";

pub const START_SQL_IMPORT: &str = "\
mutation StartSqlImport($envId: ID!) {
  startSqlImport(input: { envId: $envId }) {
    success
  }
}";
